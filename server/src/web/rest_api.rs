use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;

use crate::auth::token::{clear_session_cookie, create_session_token, session_cookie};
use crate::engine::chat_engine::{MessageInput, UserInput};
use crate::engine::error::ChatError;
use crate::engine::events::{
    ChannelInfo, EmoteView, HistoryPage, InvitePreview, InviteView, MessageView, ServerDetail,
    ServerInfo, UserDetail, UserProfile, UserSummary,
};

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

type ApiResult<T> = Result<T, ChatError>;

// ── Users & sessions ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub identity_token: String,
    pub name: String,
    pub email: String,
    pub birthday: Option<DateTime<Utc>>,
}

/// POST /api/users: register the holder of an identity token.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserProfile>)> {
    let input = UserInput {
        name: body.name,
        email: body.email,
        birthday: body.birthday,
    };
    let profile = state.engine.create_user(&body.identity_token, input).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identity_token: String,
}

/// POST /api/auth/login: exchange an identity token for a session cookie.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Response> {
    let user = state.engine.login(&body.identity_token).await?;
    let config = &state.auth_config;
    let token = create_session_token(&user.id, &config.jwt_secret, config.session_expiry_hours)
        .map_err(|e| {
            error!(error = %e, "failed to sign session token");
            ChatError::Unknown(format!("session token: {e}"))
        })?;
    let cookie = session_cookie(&token, config.session_expiry_hours, config.secure_cookies());
    Ok(([(header::SET_COOKIE, cookie)], Json(user)).into_response())
}

/// POST /api/auth/logout: clear the session cookie.
pub async fn logout(State(state): State<Arc<AppState>>) -> Response {
    let cookie = clear_session_cookie(state.auth_config.secure_cookies());
    ([(header::SET_COOKIE, cookie)], StatusCode::NO_CONTENT).into_response()
}

/// GET /api/me
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<UserProfile>> {
    Ok(Json(state.engine.me(auth.actor()).await?))
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub image_url: String,
}

/// PUT /api/me/avatar
pub async fn change_avatar(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ImageRequest>,
) -> ApiResult<Json<UserSummary>> {
    Ok(Json(
        state
            .engine
            .change_avatar(auth.actor(), &body.image_url)
            .await?,
    ))
}

/// GET /api/me/emotes: emotes usable by the current user.
pub async fn my_emotes(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<EmoteView>>> {
    Ok(Json(state.engine.my_emotes(auth.actor()).await?))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserDetail>> {
    Ok(Json(state.engine.user(auth.actor(), &user_id).await?))
}

// ── Servers ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub icon_url: Option<String>,
}

/// GET /api/servers: servers the current user belongs to.
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<ServerInfo>>> {
    Ok(Json(state.engine.my_servers(auth.actor()).await?))
}

/// POST /api/servers
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateServerRequest>,
) -> ApiResult<(StatusCode, Json<ServerInfo>)> {
    let server = state
        .engine
        .create_server(auth.actor(), &body.name, body.icon_url.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(server)))
}

/// GET /api/servers/:id
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<Json<ServerDetail>> {
    Ok(Json(state.engine.server(auth.actor(), &server_id).await?))
}

/// PUT /api/servers/:id/icon
pub async fn change_server_icon(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
    Json(body): Json<ImageRequest>,
) -> ApiResult<Json<ServerInfo>> {
    Ok(Json(
        state
            .engine
            .change_server_icon(auth.actor(), &server_id, &body.image_url)
            .await?,
    ))
}

/// POST /api/servers/:id/leave
pub async fn leave_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.leave_server(auth.actor(), &server_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/servers/:id/members/:user_id: kick a member (admin only).
pub async fn kick_member(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((server_id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .kick_member(auth.actor(), &server_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Channels & messages ─────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
}

/// GET /api/servers/:id/channels
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<Json<Vec<ChannelInfo>>> {
    Ok(Json(state.engine.channels(auth.actor(), &server_id).await?))
}

/// POST /api/servers/:id/channels
pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
    Json(body): Json<CreateChannelRequest>,
) -> ApiResult<(StatusCode, Json<ChannelInfo>)> {
    let channel = state
        .engine
        .create_channel(auth.actor(), &server_id, &body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

/// GET /api/channels/:id
pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(channel_id): Path<String>,
) -> ApiResult<Json<ChannelInfo>> {
    Ok(Json(state.engine.channel(auth.actor(), &channel_id).await?))
}

/// DELETE /api/channels/:id
pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(channel_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.delete_channel(auth.actor(), &channel_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub before: Option<String>,
    pub limit: Option<u32>,
}

/// GET /api/channels/:id/messages
pub async fn get_channel_history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(channel_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryPage>> {
    let page = state
        .engine
        .messages(
            auth.actor(),
            &channel_id,
            params.before.as_deref(),
            params.limit,
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub emote_ids: Vec<String>,
    pub invite_id: Option<String>,
}

/// POST /api/channels/:id/messages
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(channel_id): Path<String>,
    Json(body): Json<CreateMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageView>)> {
    let input = MessageInput {
        content: body.content,
        image_url: body.image_url,
        emote_ids: body.emote_ids,
        invite_id: body.invite_id,
    };
    let message = state
        .engine
        .create_message(auth.actor(), &channel_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

// ── Invites ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateInviteRequest {
    pub expires_at: Option<DateTime<Utc>>,
}

/// GET /api/servers/:id/invites
pub async fn list_invites(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<Json<Vec<InviteView>>> {
    Ok(Json(state.engine.invites(auth.actor(), &server_id).await?))
}

/// POST /api/servers/:id/invites
pub async fn create_invite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
    Json(body): Json<CreateInviteRequest>,
) -> ApiResult<(StatusCode, Json<InviteView>)> {
    let invite = state
        .engine
        .create_invite(auth.actor(), &server_id, body.expires_at)
        .await?;
    Ok((StatusCode::CREATED, Json(invite)))
}

/// GET /api/invites/:id: preview an invite before redeeming it.
pub async fn get_invite_preview(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(invite_id): Path<String>,
) -> ApiResult<Json<InvitePreview>> {
    Ok(Json(state.engine.invite(auth.actor(), &invite_id).await?))
}

/// POST /api/invites/:id/redeem
pub async fn redeem_invite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(invite_id): Path<String>,
) -> ApiResult<Json<ServerInfo>> {
    Ok(Json(
        state.engine.redeem_invite(auth.actor(), &invite_id).await?,
    ))
}

/// DELETE /api/invites/:id
pub async fn remove_invite(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(invite_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.remove_invite(auth.actor(), &invite_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Emotes ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateEmoteRequest {
    pub name: String,
    pub image_url: String,
}

/// GET /api/servers/:id/emotes
pub async fn list_server_emotes(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<Json<Vec<EmoteView>>> {
    Ok(Json(
        state.engine.server_emotes(auth.actor(), &server_id).await?,
    ))
}

/// POST /api/servers/:id/emotes
pub async fn create_emote(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
    Json(body): Json<CreateEmoteRequest>,
) -> ApiResult<(StatusCode, Json<EmoteView>)> {
    let emote = state
        .engine
        .create_emote(auth.actor(), &server_id, &body.name, &body.image_url)
        .await?;
    Ok((StatusCode::CREATED, Json(emote)))
}

/// DELETE /api/emotes/:id
pub async fn remove_emote(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(emote_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.remove_emote(auth.actor(), &emote_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Friends ─────────────────────────────────────────────

/// POST /api/friends/:user_id/request
pub async fn send_friend_request(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .send_friend_request(auth.actor(), &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/friends/:user_id/accept
pub async fn accept_friend_request(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .accept_friend_request(auth.actor(), &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/friends/:user_id/decline
pub async fn decline_friend_request(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .decline_friend_request(auth.actor(), &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/friends/:user_id
pub async fn remove_friend(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.engine.remove_friend(auth.actor(), &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
