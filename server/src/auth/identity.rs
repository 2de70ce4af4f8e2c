use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity token rejected: {0}")]
    Rejected(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// External identity provider: turns an opaque bearer token into a stable
/// external user id. The chat core never inspects the token itself.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String, IdentityError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    exp: i64,
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iss: Option<String>,
}

/// Identity provider backed by HS256 tokens signed with a secret shared with
/// the issuing service. When an issuer is configured, tokens must carry it.
pub struct JwtIdentityProvider {
    secret: String,
    issuer: Option<String>,
}

impl JwtIdentityProvider {
    pub fn new(secret: impl Into<String>, issuer: Option<String>) -> Self {
        Self {
            secret: secret.into(),
            issuer: issuer.filter(|i| !i.is_empty()),
        }
    }

    /// Mint a token for `subject`, as the issuing service would.
    pub fn issue(
        &self,
        subject: &str,
        ttl: Duration,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = IdentityClaims {
            sub: subject.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, token: &str) -> Result<String, IdentityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = decode::<IdentityClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| IdentityError::Rejected(e.to_string()))?;

        if data.claims.sub.is_empty() {
            return Err(IdentityError::Rejected("empty subject".into()));
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_issue_then_verify() {
        let provider = JwtIdentityProvider::new("shared", None);
        let token = provider.issue("ext-42", Duration::minutes(5)).unwrap();
        assert_eq!(provider.verify(&token).await.unwrap(), "ext-42");
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let issuer = JwtIdentityProvider::new("one", None);
        let verifier = JwtIdentityProvider::new("two", None);
        let token = issuer.issue("ext-42", Duration::minutes(5)).unwrap();
        assert!(matches!(
            verifier.verify(&token).await,
            Err(IdentityError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_issuer_must_match_when_configured() {
        let other = JwtIdentityProvider::new("shared", Some("someone-else".into()));
        let ours = JwtIdentityProvider::new("shared", Some("accounts".into()));
        let token = other.issue("ext-42", Duration::minutes(5)).unwrap();
        assert!(ours.verify(&token).await.is_err());

        let token = ours.issue("ext-42", Duration::minutes(5)).unwrap();
        assert_eq!(ours.verify(&token).await.unwrap(), "ext-42");
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let provider = JwtIdentityProvider::new("shared", None);
        let token = provider.issue("ext-42", Duration::hours(-1)).unwrap();
        assert!(provider.verify(&token).await.is_err());
    }
}
