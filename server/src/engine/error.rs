use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of entity a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Server,
    Channel,
    Invite,
    Emote,
    Message,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "User",
            EntityKind::Server => "Server",
            EntityKind::Channel => "Channel",
            EntityKind::Invite => "Invite",
            EntityKind::Emote => "Emote",
            EntityKind::Message => "Message",
        };
        f.write_str(name)
    }
}

/// Every failure an engine operation can return. Authorization and lookup
/// failures are ordinary outcomes for the caller; `Unknown` and
/// `Inconsistent` come from the store or identity provider and are alerted.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("You are not logged in")]
    NotLoggedIn,

    #[error("{0} not found")]
    NotFound(EntityKind),

    #[error("Only the server admin can do that")]
    NotServerAdmin,

    #[error("You are not a member of this server")]
    NotServerMember,

    #[error("Operation not permitted: {0}")]
    OperationNotPermitted(String),

    #[error("Invite has expired")]
    InviteExpired,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unexpected failure: {0}")]
    Unknown(String),

    /// The identity provider answered and refused the token.
    #[error("Identity rejected: {0}")]
    IdentityRejected(String),

    /// A multi-row write left the relation graph in a state no operation
    /// should produce (e.g. a one-sided friendship edge).
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),
}

/// Stable machine-readable error code sent to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotLoggedIn,
    UserNotFound,
    ServerNotFound,
    ChannelNotFound,
    InviteNotFound,
    EmoteNotFound,
    MessageNotFound,
    NotServerAdmin,
    NotServerMember,
    OperationNotPermitted,
    InviteExpired,
    InvalidInput,
    Unknown,
}

impl ChatError {
    pub fn not_permitted(reason: impl Into<String>) -> Self {
        ChatError::OperationNotPermitted(reason.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::NotLoggedIn => ErrorCode::NotLoggedIn,
            ChatError::NotFound(kind) => match kind {
                EntityKind::User => ErrorCode::UserNotFound,
                EntityKind::Server => ErrorCode::ServerNotFound,
                EntityKind::Channel => ErrorCode::ChannelNotFound,
                EntityKind::Invite => ErrorCode::InviteNotFound,
                EntityKind::Emote => ErrorCode::EmoteNotFound,
                EntityKind::Message => ErrorCode::MessageNotFound,
            },
            ChatError::NotServerAdmin => ErrorCode::NotServerAdmin,
            ChatError::NotServerMember => ErrorCode::NotServerMember,
            ChatError::OperationNotPermitted(_) => ErrorCode::OperationNotPermitted,
            ChatError::InviteExpired => ErrorCode::InviteExpired,
            ChatError::InvalidInput(_) => ErrorCode::InvalidInput,
            ChatError::Unknown(_)
            | ChatError::IdentityRejected(_)
            | ChatError::Inconsistent(_) => ErrorCode::Unknown,
        }
    }

    /// Whether retrying the same call may succeed without the caller
    /// changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Unknown(_))
    }

    /// Message safe to show to clients. Store and invariant details stay in
    /// the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Unknown(_)
            | ChatError::IdentityRejected(_)
            | ChatError::Inconsistent(_) => {
                "Something went wrong, please try again".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::Unknown(format!("store: {e}"))
    }
}

/// The `{code, message}` body returned for a failed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&ChatError> for ApiError {
    fn from(e: &ChatError) -> Self {
        ApiError {
            code: e.code(),
            message: e.public_message(),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
