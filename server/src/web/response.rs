use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::engine::error::{ApiError, ChatError, ErrorCode};

/// HTTP status for each wire error code.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotLoggedIn => StatusCode::UNAUTHORIZED,
        ErrorCode::UserNotFound
        | ErrorCode::ServerNotFound
        | ErrorCode::ChannelNotFound
        | ErrorCode::InviteNotFound
        | ErrorCode::EmoteNotFound
        | ErrorCode::MessageNotFound => StatusCode::NOT_FOUND,
        ErrorCode::NotServerAdmin | ErrorCode::NotServerMember => StatusCode::FORBIDDEN,
        ErrorCode::OperationNotPermitted => StatusCode::CONFLICT,
        ErrorCode::InviteExpired => StatusCode::GONE,
        ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let body = ApiError::from(&self);
        (status_for(body.code), Json(body)).into_response()
    }
}
