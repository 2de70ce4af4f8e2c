use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{delete, get, post, put};
use tower_http::cors::{Any, CorsLayer};

use super::app_state::AppState;
use super::{rest_api, ws_handler};

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Restrict CORS to the configured public_url origin (or allow any for localhost dev)
    let public_url = &state.auth_config.public_url;
    let cors = if public_url.contains("localhost") || public_url.contains("127.0.0.1") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = public_url
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("https://localhost"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let auth_routes = Router::new()
        .route("/api/users", post(rest_api::create_user))
        .route("/api/auth/login", post(rest_api::login))
        .route("/api/auth/logout", post(rest_api::logout));

    let api_routes = Router::new()
        // Current user
        .route("/api/me", get(rest_api::get_me))
        .route("/api/me/avatar", put(rest_api::change_avatar))
        .route("/api/me/emotes", get(rest_api::my_emotes))
        .route("/api/users/{id}", get(rest_api::get_user))
        // Servers
        .route(
            "/api/servers",
            get(rest_api::list_servers).post(rest_api::create_server),
        )
        .route("/api/servers/{id}", get(rest_api::get_server))
        .route("/api/servers/{id}/icon", put(rest_api::change_server_icon))
        .route("/api/servers/{id}/leave", post(rest_api::leave_server))
        .route(
            "/api/servers/{id}/members/{user_id}",
            delete(rest_api::kick_member),
        )
        .route(
            "/api/servers/{id}/channels",
            get(rest_api::list_channels).post(rest_api::create_channel),
        )
        .route(
            "/api/servers/{id}/invites",
            get(rest_api::list_invites).post(rest_api::create_invite),
        )
        .route(
            "/api/servers/{id}/emotes",
            get(rest_api::list_server_emotes).post(rest_api::create_emote),
        )
        // Channels
        .route(
            "/api/channels/{id}",
            get(rest_api::get_channel).delete(rest_api::delete_channel),
        )
        .route(
            "/api/channels/{id}/messages",
            get(rest_api::get_channel_history).post(rest_api::create_message),
        )
        .route("/api/channels/{id}/subscribe", get(ws_handler::subscribe))
        // Invites
        .route(
            "/api/invites/{id}",
            get(rest_api::get_invite_preview).delete(rest_api::remove_invite),
        )
        .route("/api/invites/{id}/redeem", post(rest_api::redeem_invite))
        // Emotes
        .route("/api/emotes/{id}", delete(rest_api::remove_emote))
        // Friends
        .route(
            "/api/friends/{user_id}",
            delete(rest_api::remove_friend),
        )
        .route(
            "/api/friends/{user_id}/request",
            post(rest_api::send_friend_request),
        )
        .route(
            "/api/friends/{user_id}/accept",
            post(rest_api::accept_friend_request),
        )
        .route(
            "/api/friends/{user_id}/decline",
            post(rest_api::decline_friend_request),
        );

    Router::new()
        .merge(auth_routes)
        .merge(api_routes)
        .layer(cors)
        .with_state(state)
}
