use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use tracing::debug;

use crate::auth::token::{SESSION_COOKIE, validate_session_token};

use super::app_state::AppState;

/// The acting user resolved from the `simplechat_session` cookie.
///
/// Extraction never rejects: a missing, expired or forged session yields no
/// user, and the engine answers `NOT_LOGGED_IN` for operations that need one.
#[derive(Debug, Clone, Default)]
pub struct AuthUser {
    pub user_id: Option<String>,
}

impl AuthUser {
    pub fn actor(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(AuthUser::default());
        };

        match validate_session_token(cookie.value(), &state.auth_config.jwt_secret) {
            Ok(claims) => Ok(AuthUser {
                user_id: Some(claims.sub),
            }),
            Err(e) => {
                debug!(error = %e, "ignoring invalid session cookie");
                Ok(AuthUser::default())
            }
        }
    }
}
