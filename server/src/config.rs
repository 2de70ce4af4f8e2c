use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::auth::config::AuthConfig;
use crate::engine::chat_engine::EngineSettings;

/// Top-level server configuration, loaded from simplechat.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub limits: LimitsSection,
    pub alerts: AlertsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:simplechat.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
    pub public_url: String,
    pub identity_secret: String,
    pub identity_issuer: Option<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        let defaults = AuthConfig::default();
        Self {
            jwt_secret: defaults.jwt_secret,
            session_expiry_hours: defaults.session_expiry_hours,
            public_url: defaults.public_url,
            identity_secret: defaults.identity_secret,
            identity_issuer: defaults.identity_issuer,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub store_timeout_ms: u64,
    pub identity_timeout_ms: u64,
    pub subscriber_queue: usize,
    pub max_message_length: usize,
    pub history_page_size: u32,
    pub max_history_page_size: u32,
}

impl Default for LimitsSection {
    fn default() -> Self {
        let defaults = EngineSettings::default();
        Self {
            store_timeout_ms: defaults.store_timeout.as_millis() as u64,
            identity_timeout_ms: defaults.identity_timeout.as_millis() as u64,
            subscriber_queue: defaults.subscriber_queue,
            max_message_length: defaults.max_message_length,
            history_page_size: defaults.history_page_size,
            max_history_page_size: defaults.max_history_page_size,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AlertsSection {
    /// Operator webhook that receives `ALERT:` posts. Alerts are only logged
    /// when unset.
    pub webhook_url: Option<String>,
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::parse(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Ok(v) = std::env::var("SESSION_EXPIRY_HOURS")
            && let Ok(hours) = v.parse()
        {
            self.auth.session_expiry_hours = hours;
        }
        if let Ok(v) = std::env::var("PUBLIC_URL") {
            self.auth.public_url = v;
        }
        if let Ok(v) = std::env::var("IDENTITY_SECRET") {
            self.auth.identity_secret = v;
        }
        if let Ok(v) = std::env::var("IDENTITY_ISSUER") {
            self.auth.identity_issuer = Some(v).filter(|v| !v.is_empty());
        }
        if let Ok(v) = std::env::var("STORE_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.limits.store_timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("SUBSCRIBER_QUEUE")
            && let Ok(n) = v.parse()
        {
            self.limits.subscriber_queue = n;
        }
        if let Ok(v) = std::env::var("MAX_MESSAGE_LENGTH")
            && let Ok(len) = v.parse()
        {
            self.limits.max_message_length = len;
        }
        if let Ok(v) = std::env::var("ALERT_WEBHOOK") {
            self.alerts.webhook_url = Some(v).filter(|v| !v.is_empty());
        }
    }

    /// Convert into an AuthConfig for the auth layer.
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            session_expiry_hours: self.auth.session_expiry_hours,
            public_url: self.auth.public_url.clone(),
            identity_secret: self.auth.identity_secret.clone(),
            identity_issuer: self.auth.identity_issuer.clone(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let max_page = self.limits.max_history_page_size.max(1);
        EngineSettings {
            store_timeout: Duration::from_millis(self.limits.store_timeout_ms.max(1)),
            identity_timeout: Duration::from_millis(self.limits.identity_timeout_ms.max(1)),
            subscriber_queue: self.limits.subscriber_queue.max(1),
            max_message_length: self.limits.max_message_length,
            history_page_size: self.limits.history_page_size.clamp(1, max_page),
            max_history_page_size: max_page,
        }
    }
}
