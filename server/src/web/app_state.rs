use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::config::AuthConfig;
use crate::engine::chat_engine::ChatEngine;

/// Shared application state passed to all axum handlers.
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub auth_config: AuthConfig,
    /// Cancelled on shutdown; open subscription sockets close when it fires.
    pub shutdown: CancellationToken,
}
