const DEV_JWT_SECRET: &str = "simplechat-dev-secret-change-me";
const DEV_IDENTITY_SECRET: &str = "simplechat-dev-identity-secret";

/// Authentication configuration, loaded from the config file or environment.
#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
    pub public_url: String,
    /// Shared secret used to verify identity provider tokens.
    pub identity_secret: String,
    /// Required `iss` claim on identity tokens, if set.
    pub identity_issuer: Option<String>,
}

impl AuthConfig {
    /// Load auth config from environment variables.
    pub fn from_env() -> Self {
        Self {
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string()),
            session_expiry_hours: std::env::var("SESSION_EXPIRY_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(720), // 30 days
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            identity_secret: std::env::var("IDENTITY_SECRET")
                .unwrap_or_else(|_| DEV_IDENTITY_SECRET.to_string()),
            identity_issuer: std::env::var("IDENTITY_ISSUER")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }

    /// Cookies get the `Secure` flag when served over https.
    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https")
    }

    pub fn uses_dev_secrets(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET || self.identity_secret == DEV_IDENTITY_SECRET
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.into(),
            session_expiry_hours: 720,
            public_url: "http://localhost:8080".into(),
            identity_secret: DEV_IDENTITY_SECRET.into(),
            identity_issuer: None,
        }
    }
}
