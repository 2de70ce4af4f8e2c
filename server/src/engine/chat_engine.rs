use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::identity::{IdentityError, IdentityProvider};
use crate::db::models::{EmoteRow, NewMessage, NewUser, UserRow};

use super::alerts::Alerter;
use super::error::{ChatError, ChatResult, EntityKind};
use super::events::{
    ChannelInfo, EmoteView, HistoryPage, InvitePreview, InviteView, MessageView, ServerDetail,
    ServerInfo, UserDetail, UserProfile, UserSummary,
};
use super::fanout::{ChannelSubscription, DEFAULT_SUBSCRIBER_QUEUE, MessageHub};
use super::graph::{DEFAULT_STORE_TIMEOUT, EntityGraph};
use super::permissions::{
    has_pending_request_from, is_friend_of, require_admin, require_authenticated, require_member,
};
use super::relations::{FriendAction, FriendState, MembershipAction, MembershipState};
use super::validation;

/// Tunables for the engine. Defaults match the documented config defaults.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub store_timeout: Duration,
    pub identity_timeout: Duration,
    pub subscriber_queue: usize,
    pub max_message_length: usize,
    pub history_page_size: u32,
    pub max_history_page_size: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            identity_timeout: Duration::from_secs(5),
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
            max_message_length: validation::MAX_MESSAGE_LENGTH,
            history_page_size: 50,
            max_history_page_size: 200,
        }
    }
}

/// Fields supplied when registering a new user.
#[derive(Debug, Clone)]
pub struct UserInput {
    pub name: String,
    pub email: String,
    pub birthday: Option<DateTime<Utc>>,
}

/// Fields supplied when posting a message.
#[derive(Debug, Clone, Default)]
pub struct MessageInput {
    pub content: String,
    pub image_url: Option<String>,
    pub emote_ids: Vec<String>,
    pub invite_id: Option<String>,
}

impl MessageInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The operation surface of the chat core.
///
/// Every operation takes the acting user explicitly (`None` when the request
/// carries no session). Guard checks run against freshly read graph state
/// before any write; a failed check returns its error with nothing written.
/// Created messages are handed to the fan-out hub after they are stored.
pub struct ChatEngine {
    graph: EntityGraph,
    hub: MessageHub,
    identity: Arc<dyn IdentityProvider>,
    alerter: Alerter,
    settings: EngineSettings,
}

impl ChatEngine {
    pub fn new(
        pool: SqlitePool,
        identity: Arc<dyn IdentityProvider>,
        alerter: Alerter,
        settings: EngineSettings,
    ) -> Self {
        Self {
            graph: EntityGraph::new(pool, settings.store_timeout, alerter.clone()),
            hub: MessageHub::new(settings.subscriber_queue),
            identity,
            alerter,
            settings,
        }
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn hub(&self) -> &MessageHub {
        &self.hub
    }

    pub fn alerter(&self) -> &Alerter {
        &self.alerter
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ── Identity ────────────────────────────────────────────────────

    async fn verify_identity(&self, token: &str) -> ChatResult<String> {
        match tokio::time::timeout(self.settings.identity_timeout, self.identity.verify(token))
            .await
        {
            Ok(Ok(external_id)) => Ok(external_id),
            Ok(Err(e)) => {
                self.alerter.alert(&format!("identity verification failed: {e}"));
                Err(match &e {
                    IdentityError::Rejected(_) => ChatError::IdentityRejected(e.to_string()),
                    IdentityError::Unavailable(_) => ChatError::Unknown(e.to_string()),
                })
            }
            Err(_) => {
                self.alerter.alert("identity provider timed out");
                Err(ChatError::Unknown("identity provider timed out".into()))
            }
        }
    }

    /// Resolve the acting user's row. A session naming a user that does not
    /// exist is alerted: sessions are only issued for stored users.
    async fn acting_user(&self, actor: Option<&str>) -> ChatResult<UserRow> {
        let user_id = require_authenticated(actor)?;
        match self.graph.find_user(user_id).await? {
            Some(user) => Ok(user),
            None => {
                self.alerter
                    .alert(&format!("authenticated user {user_id} does not exist"));
                Err(ChatError::NotFound(EntityKind::User))
            }
        }
    }

    // ── Users ───────────────────────────────────────────────────────

    /// Register the holder of `identity_token` as a new user. The user id is
    /// the provider's external id.
    pub async fn create_user(
        &self,
        identity_token: &str,
        input: UserInput,
    ) -> ChatResult<UserProfile> {
        validation::validate_user_name(&input.name).map_err(ChatError::InvalidInput)?;
        validation::validate_email(&input.email).map_err(ChatError::InvalidInput)?;
        let user_id = self.verify_identity(identity_token).await?;

        let new_user = NewUser {
            id: &user_id,
            name: input.name.trim(),
            email: &input.email,
            birthday: input.birthday,
            icon_url: None,
        };
        if !self.graph.create_user(&new_user, Utc::now()).await? {
            return Err(ChatError::not_permitted("user already exists"));
        }

        info!(%user_id, "user created");
        let user = self.graph.user(&user_id).await?;
        self.graph.user_profile(user).await
    }

    /// Check an identity token and return the matching stored user. The
    /// caller issues the session.
    pub async fn login(&self, identity_token: &str) -> ChatResult<UserSummary> {
        let user_id = self.verify_identity(identity_token).await?;
        let user = self.graph.user(&user_id).await?;
        info!(%user_id, "user logged in");
        Ok(user.into())
    }

    pub async fn me(&self, actor: Option<&str>) -> ChatResult<UserProfile> {
        let user = self.acting_user(actor).await?;
        self.graph.user_profile(user).await
    }

    pub async fn user(&self, actor: Option<&str>, user_id: &str) -> ChatResult<UserDetail> {
        let actor_id = require_authenticated(actor)?;
        let user = self.graph.user(user_id).await?;
        let relations = self.graph.user_relations(user_id).await?;

        Ok(UserDetail {
            is_friend: is_friend_of(actor_id, &relations),
            sent_friend_request: has_pending_request_from(actor_id, &relations),
            id: user.id,
            name: user.name,
            icon_url: user.icon_url,
            birthday: user.birthday,
            created_at: user.created_at,
        })
    }

    pub async fn change_avatar(
        &self,
        actor: Option<&str>,
        image_url: &str,
    ) -> ChatResult<UserSummary> {
        let user = self.acting_user(actor).await?;
        validation::validate_image_url(image_url).map_err(ChatError::InvalidInput)?;

        self.graph
            .set_user_icon(&user.id, image_url, Utc::now())
            .await?;
        info!(user_id = %user.id, "avatar changed");
        Ok(UserSummary {
            id: user.id,
            name: user.name,
            icon_url: Some(image_url.to_string()),
        })
    }

    // ── Servers ─────────────────────────────────────────────────────

    /// Create a server. The acting user becomes its author and first member.
    pub async fn create_server(
        &self,
        actor: Option<&str>,
        name: &str,
        icon_url: Option<&str>,
    ) -> ChatResult<ServerInfo> {
        let author = self.acting_user(actor).await?;
        validation::validate_server_name(name).map_err(ChatError::InvalidInput)?;
        if let Some(url) = icon_url {
            validation::validate_image_url(url).map_err(ChatError::InvalidInput)?;
        }

        let server_id = new_id();
        let now = Utc::now();
        self.graph
            .create_server(&server_id, name.trim(), &author.id, icon_url, now)
            .await?;

        info!(%server_id, author_id = %author.id, "server created");
        Ok(ServerInfo {
            id: server_id,
            name: name.trim().to_string(),
            icon_url: icon_url.map(str::to_string),
            author_id: author.id,
            created_at: now,
        })
    }

    /// Full server view. Members only.
    pub async fn server(&self, actor: Option<&str>, server_id: &str) -> ChatResult<ServerDetail> {
        let actor_id = require_authenticated(actor)?;
        let access = self.graph.server_access(server_id).await?;
        require_member(actor_id, &access)?;

        let server = self.graph.server(server_id).await?;
        self.graph.server_detail(server).await
    }

    pub async fn my_servers(&self, actor: Option<&str>) -> ChatResult<Vec<ServerInfo>> {
        let actor_id = require_authenticated(actor)?;
        self.graph.servers_for_user(actor_id).await
    }

    pub async fn change_server_icon(
        &self,
        actor: Option<&str>,
        server_id: &str,
        image_url: &str,
    ) -> ChatResult<ServerInfo> {
        let actor_id = require_authenticated(actor)?;
        let access = self.graph.server_access(server_id).await?;
        require_admin(actor_id, &access)?;
        validation::validate_image_url(image_url).map_err(ChatError::InvalidInput)?;

        self.graph
            .set_server_icon(server_id, image_url, Utc::now())
            .await?;
        info!(%server_id, "server icon changed");
        Ok(self.graph.server(server_id).await?.into())
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Join the invite's server. Already being a member is a no-op success.
    pub async fn redeem_invite(
        &self,
        actor: Option<&str>,
        invite_id: &str,
    ) -> ChatResult<ServerInfo> {
        let user = self.acting_user(actor).await?;
        let invite = self.graph.invite(invite_id).await?;
        if invite.is_expired_at(Utc::now()) {
            return Err(ChatError::InviteExpired);
        }

        let access = self.graph.server_access(&invite.server_id).await?;
        let state = MembershipState::of(
            &user.id,
            &access.author_id,
            access.members.contains(&user.id),
        );
        let transition = state.apply(MembershipAction::Redeem)?;
        if transition.write {
            self.graph
                .add_member(&invite.server_id, &user.id, Utc::now())
                .await?;
            info!(server_id = %invite.server_id, user_id = %user.id, %invite_id, "invite redeemed");
        }

        Ok(self.graph.server(&invite.server_id).await?.into())
    }

    pub async fn leave_server(&self, actor: Option<&str>, server_id: &str) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let access = self.graph.server_access(server_id).await?;
        let state = MembershipState::of(
            actor_id,
            &access.author_id,
            access.members.contains(actor_id),
        );
        state.apply(MembershipAction::Leave)?;

        if !self.graph.remove_member(server_id, actor_id).await? {
            return Err(ChatError::NotServerMember);
        }
        info!(%server_id, user_id = %actor_id, "member left server");
        Ok(())
    }

    /// Remove another member. Admin only; the admin can never be removed.
    pub async fn kick_member(
        &self,
        actor: Option<&str>,
        server_id: &str,
        target_id: &str,
    ) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let access = self.graph.server_access(server_id).await?;
        require_admin(actor_id, &access)?;

        let state = MembershipState::of(
            target_id,
            &access.author_id,
            access.members.contains(target_id),
        );
        state.apply(MembershipAction::Kick)?;

        if !self.graph.remove_member(server_id, target_id).await? {
            return Err(ChatError::NotServerMember);
        }
        info!(%server_id, user_id = %target_id, kicked_by = %actor_id, "member kicked");
        Ok(())
    }

    // ── Channels ────────────────────────────────────────────────────

    pub async fn create_channel(
        &self,
        actor: Option<&str>,
        server_id: &str,
        name: &str,
    ) -> ChatResult<ChannelInfo> {
        let author = self.acting_user(actor).await?;
        validation::validate_channel_name(name).map_err(ChatError::InvalidInput)?;
        self.graph.server(server_id).await?;

        let channel_id = new_id();
        let now = Utc::now();
        self.graph
            .create_channel(&channel_id, server_id, &author.id, name.trim(), now)
            .await?;

        info!(%channel_id, %server_id, "channel created");
        Ok(ChannelInfo {
            id: channel_id,
            server_id: server_id.to_string(),
            author_id: author.id,
            name: name.trim().to_string(),
            created_at: now,
        })
    }

    /// Delete a channel and its messages. Live subscriptions to it end.
    pub async fn delete_channel(&self, actor: Option<&str>, channel_id: &str) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let channel = self.graph.channel(channel_id).await?;
        let access = self.graph.server_access(&channel.server_id).await?;
        require_admin(actor_id, &access)?;

        if !self.graph.delete_channel(channel_id).await? {
            return Err(ChatError::NotFound(EntityKind::Channel));
        }
        let dropped = self.hub.close_channel(channel_id);
        info!(%channel_id, server_id = %channel.server_id, dropped, "channel deleted");
        Ok(())
    }

    pub async fn channel(&self, actor: Option<&str>, channel_id: &str) -> ChatResult<ChannelInfo> {
        let actor_id = require_authenticated(actor)?;
        let channel = self.graph.channel(channel_id).await?;
        let access = self.graph.server_access(&channel.server_id).await?;
        require_member(actor_id, &access)?;
        Ok(channel.into())
    }

    /// A server's channels in creation order. Members only.
    pub async fn channels(
        &self,
        actor: Option<&str>,
        server_id: &str,
    ) -> ChatResult<Vec<ChannelInfo>> {
        let actor_id = require_authenticated(actor)?;
        let access = self.graph.server_access(server_id).await?;
        require_member(actor_id, &access)?;
        self.graph.channels_of(server_id).await
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Store a message, then deliver it to the channel's live subscribers.
    pub async fn create_message(
        &self,
        actor: Option<&str>,
        channel_id: &str,
        input: MessageInput,
    ) -> ChatResult<MessageView> {
        let author = self.acting_user(actor).await?;
        validation::validate_message(&input.content, self.settings.max_message_length)
            .map_err(ChatError::InvalidInput)?;
        if let Some(url) = &input.image_url {
            validation::validate_image_url(url).map_err(ChatError::InvalidInput)?;
        }

        let channel = self.graph.channel(channel_id).await?;
        self.graph.require_emotes(&input.emote_ids).await?;
        if let Some(invite_id) = &input.invite_id {
            self.graph.invite(invite_id).await?;
        }

        let message_id = new_id();
        let now = Utc::now();
        let new_message = NewMessage {
            id: &message_id,
            channel_id,
            author_id: &author.id,
            content: &input.content,
            image_url: input.image_url.as_deref(),
            invite_id: input.invite_id.as_deref(),
            emote_ids: &input.emote_ids,
        };
        self.graph.insert_message(&new_message, now).await?;

        let view = MessageView {
            id: message_id,
            channel_id: channel.id,
            server_id: channel.server_id,
            author: author.into(),
            content: input.content,
            image_url: input.image_url,
            emote_ids: input.emote_ids,
            invite_id: input.invite_id,
            created_at: now,
        };
        let delivered = self.hub.publish(view.clone());
        info!(message_id = %view.id, %channel_id, delivered, "message created");
        Ok(view)
    }

    /// Page through channel history, newest first. Members only.
    pub async fn messages(
        &self,
        actor: Option<&str>,
        channel_id: &str,
        before: Option<&str>,
        limit: Option<u32>,
    ) -> ChatResult<HistoryPage> {
        let actor_id = require_authenticated(actor)?;
        let channel = self.graph.channel(channel_id).await?;
        let access = self.graph.server_access(&channel.server_id).await?;
        require_member(actor_id, &access)?;

        if let Some(before_id) = before {
            let anchor = self.graph.message(before_id).await?;
            if anchor.channel_id != channel_id {
                return Err(ChatError::NotFound(EntityKind::Message));
            }
        }

        let limit = limit
            .unwrap_or(self.settings.history_page_size)
            .clamp(1, self.settings.max_history_page_size);
        let (messages, has_more) = self.graph.history(channel_id, before, limit).await?;
        Ok(HistoryPage {
            channel_id: channel_id.to_string(),
            messages,
            has_more,
        })
    }

    /// Register a live subscription on a channel. Only messages created
    /// after this call are delivered; earlier ones come from `messages`.
    pub fn subscribe(&self, channel_id: &str) -> ChannelSubscription {
        self.hub.subscribe(channel_id)
    }

    /// `subscribe` for a channel that must exist. The channel is checked
    /// after registering, so a concurrent `delete_channel` either closes the
    /// new subscription or makes this return `ChannelNotFound`.
    pub async fn open_subscription(&self, channel_id: &str) -> ChatResult<ChannelSubscription> {
        let subscription = self.hub.subscribe(channel_id);
        self.graph.channel(channel_id).await?;
        Ok(subscription)
    }

    // ── Invites ─────────────────────────────────────────────────────

    pub async fn create_invite(
        &self,
        actor: Option<&str>,
        server_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> ChatResult<InviteView> {
        let author = self.acting_user(actor).await?;
        self.graph.server(server_id).await?;

        let invite_id = new_id();
        let now = Utc::now();
        self.graph
            .create_invite(&invite_id, server_id, &author.id, expires_at, now)
            .await?;

        info!(%invite_id, %server_id, "invite created");
        Ok(InviteView {
            id: invite_id,
            server_id: server_id.to_string(),
            author_id: author.id,
            expires_at,
            created_at: now,
        })
    }

    /// What an invite leads to, for anyone holding its id.
    pub async fn invite(&self, actor: Option<&str>, invite_id: &str) -> ChatResult<InvitePreview> {
        require_authenticated(actor)?;
        let invite = self.graph.invite(invite_id).await?;
        let server = self.graph.server(&invite.server_id).await?;
        let author = self.graph.user(&invite.author_id).await?;

        Ok(InvitePreview {
            expired: invite.is_expired_at(Utc::now()),
            id: invite.id,
            server: server.into(),
            author: author.into(),
            expires_at: invite.expires_at,
        })
    }

    pub async fn invites(
        &self,
        actor: Option<&str>,
        server_id: &str,
    ) -> ChatResult<Vec<InviteView>> {
        let actor_id = require_authenticated(actor)?;
        let access = self.graph.server_access(server_id).await?;
        require_member(actor_id, &access)?;
        self.graph.invites_of(server_id).await
    }

    pub async fn remove_invite(&self, actor: Option<&str>, invite_id: &str) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let invite = self.graph.invite(invite_id).await?;
        let access = self.graph.server_access(&invite.server_id).await?;
        require_admin(actor_id, &access)?;

        if !self.graph.delete_invite(invite_id).await? {
            return Err(ChatError::NotFound(EntityKind::Invite));
        }
        info!(%invite_id, server_id = %invite.server_id, "invite removed");
        Ok(())
    }

    // ── Emotes ──────────────────────────────────────────────────────

    pub async fn create_emote(
        &self,
        actor: Option<&str>,
        server_id: &str,
        name: &str,
        image_url: &str,
    ) -> ChatResult<EmoteView> {
        let author = self.acting_user(actor).await?;
        let access = self.graph.server_access(server_id).await?;
        require_admin(&author.id, &access)?;
        validation::validate_emote_name(name).map_err(ChatError::InvalidInput)?;
        validation::validate_image_url(image_url).map_err(ChatError::InvalidInput)?;

        let now = Utc::now();
        let emote = EmoteRow {
            id: new_id(),
            server_id: server_id.to_string(),
            author_id: author.id,
            name: name.to_string(),
            image_url: image_url.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.graph.create_emote(&emote).await?;

        info!(emote_id = %emote.id, %server_id, name = %emote.name, "emote created");
        Ok(emote.into())
    }

    pub async fn remove_emote(&self, actor: Option<&str>, emote_id: &str) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let emote = self.graph.emote(emote_id).await?;
        let access = self.graph.server_access(&emote.server_id).await?;
        require_admin(actor_id, &access)?;

        if !self.graph.delete_emote(emote_id).await? {
            return Err(ChatError::NotFound(EntityKind::Emote));
        }
        info!(%emote_id, server_id = %emote.server_id, "emote removed");
        Ok(())
    }

    pub async fn server_emotes(
        &self,
        actor: Option<&str>,
        server_id: &str,
    ) -> ChatResult<Vec<EmoteView>> {
        let actor_id = require_authenticated(actor)?;
        let access = self.graph.server_access(server_id).await?;
        require_member(actor_id, &access)?;
        self.graph.emotes_of(server_id).await
    }

    /// Emotes from every server the acting user belongs to.
    pub async fn my_emotes(&self, actor: Option<&str>) -> ChatResult<Vec<EmoteView>> {
        let actor_id = require_authenticated(actor)?;
        self.graph.emotes_for_user(actor_id).await
    }

    // ── Friends ─────────────────────────────────────────────────────

    pub async fn send_friend_request(
        &self,
        actor: Option<&str>,
        target_id: &str,
    ) -> ChatResult<()> {
        let requester = self.acting_user(actor).await?;
        if requester.id == target_id {
            return Err(ChatError::not_permitted(
                "you cannot send a friend request to yourself",
            ));
        }
        self.graph.user(target_id).await?;

        let relations = self.graph.user_relations(&requester.id).await?;
        FriendState::between(&relations, target_id).apply(FriendAction::Send)?;

        // The insert re-checks both directions, so a request that raced in
        // since the read above is refused rather than duplicated.
        if !self
            .graph
            .insert_friend_request(&requester.id, target_id, Utc::now())
            .await?
        {
            return Err(ChatError::not_permitted("a friend request is already pending"));
        }
        info!(requester_id = %requester.id, %target_id, "friend request sent");
        Ok(())
    }

    pub async fn accept_friend_request(
        &self,
        actor: Option<&str>,
        requester_id: &str,
    ) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let relations = self.graph.user_relations(actor_id).await?;
        FriendState::between(&relations, requester_id).apply(FriendAction::Accept)?;

        if !self
            .graph
            .accept_friend_request(requester_id, actor_id, Utc::now())
            .await?
        {
            return Err(ChatError::not_permitted(
                "no pending friend request from this user",
            ));
        }
        self.graph
            .verify_friendship(actor_id, requester_id, true)
            .await?;
        info!(user_id = %actor_id, %requester_id, "friend request accepted");
        Ok(())
    }

    pub async fn decline_friend_request(
        &self,
        actor: Option<&str>,
        requester_id: &str,
    ) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let relations = self.graph.user_relations(actor_id).await?;
        FriendState::between(&relations, requester_id).apply(FriendAction::Decline)?;

        if !self
            .graph
            .delete_friend_request(requester_id, actor_id)
            .await?
        {
            return Err(ChatError::not_permitted(
                "no pending friend request from this user",
            ));
        }
        info!(user_id = %actor_id, %requester_id, "friend request declined");
        Ok(())
    }

    pub async fn remove_friend(&self, actor: Option<&str>, target_id: &str) -> ChatResult<()> {
        let actor_id = require_authenticated(actor)?;
        let relations = self.graph.user_relations(actor_id).await?;
        FriendState::between(&relations, target_id).apply(FriendAction::Remove)?;

        let removed = self.graph.remove_friendship(actor_id, target_id).await?;
        match removed {
            0 => {
                return Err(ChatError::not_permitted(
                    "you are not friends with this user",
                ));
            }
            2 => {}
            _ => {
                let detail = format!(
                    "friendship between {actor_id} and {target_id} had {removed} directed edge(s)"
                );
                error!(user_id = %actor_id, %target_id, removed, "one-sided friendship removed");
                self.alerter.alert(&detail);
                return Err(ChatError::Inconsistent(detail));
            }
        }
        if let Err(e) = self.graph.verify_friendship(actor_id, target_id, false).await {
            error!(user_id = %actor_id, %target_id, "friendship edges survived removal");
            return Err(e);
        }
        info!(user_id = %actor_id, %target_id, "friend removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::JwtIdentityProvider;
    use crate::db::pool::{create_pool, run_migrations};
    use crate::engine::error::ErrorCode;
    use chrono::Duration as ChronoDuration;

    const IDP_SECRET: &str = "test-identity-secret";

    async fn engine() -> ChatEngine {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        ChatEngine::new(
            pool,
            Arc::new(JwtIdentityProvider::new(IDP_SECRET, None)),
            Alerter::disabled(),
            EngineSettings::default(),
        )
    }

    fn token_for(external_id: &str) -> String {
        JwtIdentityProvider::new(IDP_SECRET, None)
            .issue(external_id, ChronoDuration::minutes(5))
            .unwrap()
    }

    async fn register(engine: &ChatEngine, id: &str) -> String {
        let input = UserInput {
            name: format!("user {id}"),
            email: format!("{id}@example.com"),
            birthday: None,
        };
        engine.create_user(&token_for(id), input).await.unwrap().id
    }

    fn code<T: std::fmt::Debug>(result: ChatResult<T>) -> ErrorCode {
        result.unwrap_err().code()
    }

    #[tokio::test]
    async fn test_create_user_and_login() {
        let engine = engine().await;
        let id = register(&engine, "ext-1").await;
        assert_eq!(id, "ext-1");

        let summary = engine.login(&token_for("ext-1")).await.unwrap();
        assert_eq!(summary.name, "user ext-1");

        assert_eq!(
            code(engine.login(&token_for("ext-unknown")).await),
            ErrorCode::UserNotFound
        );
    }

    #[tokio::test]
    async fn test_create_user_twice_is_refused() {
        let engine = engine().await;
        register(&engine, "ext-1").await;
        let input = UserInput {
            name: "again".into(),
            email: "again@example.com".into(),
            birthday: None,
        };
        assert_eq!(
            code(engine.create_user(&token_for("ext-1"), input).await),
            ErrorCode::OperationNotPermitted
        );
    }

    #[tokio::test]
    async fn test_bad_identity_token_is_unknown_and_alerted() {
        let engine = engine().await;
        let input = UserInput {
            name: "x".into(),
            email: "x@example.com".into(),
            birthday: None,
        };
        let err = engine.create_user("garbage", input).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(!err.is_retryable());
        assert_eq!(engine.alerter().raised(), 1);
    }

    struct UnreachableProvider;

    #[async_trait::async_trait]
    impl IdentityProvider for UnreachableProvider {
        async fn verify(&self, _token: &str) -> Result<String, IdentityError> {
            Err(IdentityError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_identity_provider_is_retryable() {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let engine = ChatEngine::new(
            pool,
            Arc::new(UnreachableProvider),
            Alerter::disabled(),
            EngineSettings::default(),
        );

        let err = engine.login("any-token").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(err.is_retryable());
        assert_eq!(engine.alerter().raised(), 1);
    }

    #[tokio::test]
    async fn test_create_user_validates_input() {
        let engine = engine().await;
        let input = UserInput {
            name: "ok".into(),
            email: "not-an-email".into(),
            birthday: None,
        };
        assert_eq!(
            code(engine.create_user(&token_for("ext-1"), input).await),
            ErrorCode::InvalidInput
        );
    }

    #[tokio::test]
    async fn test_operations_require_login() {
        let engine = engine().await;
        assert_eq!(
            code(engine.create_server(None, "S", None).await),
            ErrorCode::NotLoggedIn
        );
        assert_eq!(code(engine.me(None).await), ErrorCode::NotLoggedIn);
        assert_eq!(
            code(engine.create_message(None, "c", MessageInput::text("hi")).await),
            ErrorCode::NotLoggedIn
        );
        assert_eq!(
            code(engine.send_friend_request(None, "x").await),
            ErrorCode::NotLoggedIn
        );
        assert_eq!(
            code(engine.redeem_invite(None, "x").await),
            ErrorCode::NotLoggedIn
        );
    }

    #[tokio::test]
    async fn test_session_for_missing_user_is_alerted() {
        let engine = engine().await;
        assert_eq!(code(engine.me(Some("ghost")).await), ErrorCode::UserNotFound);
        assert_eq!(engine.alerter().raised(), 1);
    }

    #[tokio::test]
    async fn test_create_server_makes_author_a_member() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let server = engine.create_server(Some(&u1), "  Home ", None).await.unwrap();
        assert_eq!(server.name, "Home");
        assert_eq!(server.author_id, u1);

        let detail = engine.server(Some(&u1), &server.id).await.unwrap();
        assert_eq!(detail.members.len(), 1);
        assert_eq!(detail.members[0].id, u1);

        let mine = engine.my_servers(Some(&u1)).await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn test_server_view_is_members_only() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();

        assert_eq!(
            code(engine.server(Some(&u2), &server.id).await),
            ErrorCode::NotServerMember
        );
        assert_eq!(
            code(engine.server(Some(&u1), "missing").await),
            ErrorCode::ServerNotFound
        );
    }

    #[tokio::test]
    async fn test_invalid_names_and_urls() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        assert_eq!(
            code(engine.create_server(Some(&u1), "   ", None).await),
            ErrorCode::InvalidInput
        );
        assert_eq!(
            code(engine.create_server(Some(&u1), "S", Some("not a url")).await),
            ErrorCode::InvalidInput
        );
        assert_eq!(
            code(engine.change_avatar(Some(&u1), "ftp://x.com/a.png").await),
            ErrorCode::InvalidInput
        );
        let avatar = engine
            .change_avatar(Some(&u1), "https://img.example.com/me.png")
            .await
            .unwrap();
        assert_eq!(
            avatar.icon_url.as_deref(),
            Some("https://img.example.com/me.png")
        );
    }

    #[tokio::test]
    async fn test_change_server_icon_is_admin_only() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let url = "https://cdn.example.com/icon.png";

        assert_eq!(
            code(engine.change_server_icon(Some(&u2), &server.id, url).await),
            ErrorCode::NotServerAdmin
        );
        let updated = engine
            .change_server_icon(Some(&u1), &server.id, url)
            .await
            .unwrap();
        assert_eq!(updated.icon_url.as_deref(), Some(url));
    }

    #[tokio::test]
    async fn test_channel_lifecycle() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();

        assert_eq!(
            code(engine.create_channel(Some(&u1), "missing", "general").await),
            ErrorCode::ServerNotFound
        );
        let general = engine
            .create_channel(Some(&u1), &server.id, "general")
            .await
            .unwrap();
        let random = engine
            .create_channel(Some(&u1), &server.id, "random")
            .await
            .unwrap();

        let ids: Vec<_> = engine
            .channels(Some(&u1), &server.id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![general.id.clone(), random.id.clone()]);

        assert_eq!(
            code(engine.channel(Some(&u2), &general.id).await),
            ErrorCode::NotServerMember
        );
        assert_eq!(
            code(engine.delete_channel(Some(&u2), &general.id).await),
            ErrorCode::NotServerAdmin
        );
        engine.delete_channel(Some(&u1), &general.id).await.unwrap();
        assert_eq!(
            code(engine.delete_channel(Some(&u1), &general.id).await),
            ErrorCode::ChannelNotFound
        );
    }

    #[tokio::test]
    async fn test_deleting_channel_ends_subscriptions() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let channel = engine
            .create_channel(Some(&u1), &server.id, "general")
            .await
            .unwrap();

        let mut sub = engine.subscribe(&channel.id);
        engine.delete_channel(Some(&u1), &channel.id).await.unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_expired_invite_is_refused_without_joining() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let invite = engine
            .create_invite(
                Some(&u1),
                &server.id,
                Some(Utc::now() - ChronoDuration::minutes(1)),
            )
            .await
            .unwrap();

        assert_eq!(
            code(engine.redeem_invite(Some(&u2), &invite.id).await),
            ErrorCode::InviteExpired
        );
        let members = engine.graph().server_access(&server.id).await.unwrap().members;
        assert!(!members.contains(&u2));

        let preview = engine.invite(Some(&u2), &invite.id).await.unwrap();
        assert!(preview.expired);
        assert_eq!(preview.server.id, server.id);
    }

    #[tokio::test]
    async fn test_redeem_is_idempotent() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let invite = engine
            .create_invite(Some(&u1), &server.id, None)
            .await
            .unwrap();

        engine.redeem_invite(Some(&u2), &invite.id).await.unwrap();
        engine.redeem_invite(Some(&u2), &invite.id).await.unwrap();
        engine.redeem_invite(Some(&u1), &invite.id).await.unwrap();

        let access = engine.graph().server_access(&server.id).await.unwrap();
        assert_eq!(access.members.len(), 2);
        assert_eq!(
            code(engine.redeem_invite(Some(&u2), "missing").await),
            ErrorCode::InviteNotFound
        );
    }

    #[tokio::test]
    async fn test_leave_and_kick_rules() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let u3 = register(&engine, "u3").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let invite = engine
            .create_invite(Some(&u1), &server.id, None)
            .await
            .unwrap();
        engine.redeem_invite(Some(&u2), &invite.id).await.unwrap();
        engine.redeem_invite(Some(&u3), &invite.id).await.unwrap();

        // The author can neither leave nor be kicked, whoever asks.
        assert_eq!(
            code(engine.leave_server(Some(&u1), &server.id).await),
            ErrorCode::OperationNotPermitted
        );
        assert_eq!(
            code(engine.kick_member(Some(&u1), &server.id, &u1).await),
            ErrorCode::NotServerAdmin
        );
        assert_eq!(
            code(engine.kick_member(Some(&u2), &server.id, &u1).await),
            ErrorCode::NotServerAdmin
        );
        // Members cannot kick each other.
        assert_eq!(
            code(engine.kick_member(Some(&u2), &server.id, &u3).await),
            ErrorCode::NotServerAdmin
        );

        engine.kick_member(Some(&u1), &server.id, &u3).await.unwrap();
        assert_eq!(
            code(engine.kick_member(Some(&u1), &server.id, &u3).await),
            ErrorCode::NotServerMember
        );

        engine.leave_server(Some(&u2), &server.id).await.unwrap();
        assert_eq!(
            code(engine.leave_server(Some(&u2), &server.id).await),
            ErrorCode::NotServerMember
        );
        assert_eq!(
            code(engine.kick_member(Some(&u1), "missing", &u2).await),
            ErrorCode::ServerNotFound
        );

        let access = engine.graph().server_access(&server.id).await.unwrap();
        assert_eq!(access.members.len(), 1);
        assert!(access.members.contains(&u1));
    }

    #[tokio::test]
    async fn test_message_flow_and_history() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let channel = engine
            .create_channel(Some(&u1), &server.id, "general")
            .await
            .unwrap();

        for i in 0..5 {
            engine
                .create_message(Some(&u1), &channel.id, MessageInput::text(format!("m{i}")))
                .await
                .unwrap();
        }

        let page = engine
            .messages(Some(&u1), &channel.id, None, Some(3))
            .await
            .unwrap();
        let contents: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
        assert!(page.has_more);

        let last = page.messages.last().unwrap().id.clone();
        let page = engine
            .messages(Some(&u1), &channel.id, Some(&last), Some(3))
            .await
            .unwrap();
        let contents: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m0"]);
        assert!(!page.has_more);

        assert_eq!(
            code(engine.messages(Some(&u2), &channel.id, None, None).await),
            ErrorCode::NotServerMember
        );
        assert_eq!(
            code(engine.messages(Some(&u1), &channel.id, Some("nope"), None).await),
            ErrorCode::MessageNotFound
        );
    }

    #[tokio::test]
    async fn test_message_validation_and_references() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let channel = engine
            .create_channel(Some(&u1), &server.id, "general")
            .await
            .unwrap();

        assert_eq!(
            code(engine.create_message(Some(&u1), "missing", MessageInput::text("hi")).await),
            ErrorCode::ChannelNotFound
        );
        assert_eq!(
            code(engine.create_message(Some(&u1), &channel.id, MessageInput::text("  ")).await),
            ErrorCode::InvalidInput
        );
        let too_long = "x".repeat(engine.settings().max_message_length + 1);
        assert_eq!(
            code(engine.create_message(Some(&u1), &channel.id, MessageInput::text(too_long)).await),
            ErrorCode::InvalidInput
        );

        let with_missing_emote = MessageInput {
            emote_ids: vec!["ghost".into()],
            ..MessageInput::text("hi")
        };
        assert_eq!(
            code(engine.create_message(Some(&u1), &channel.id, with_missing_emote).await),
            ErrorCode::EmoteNotFound
        );
        let with_missing_invite = MessageInput {
            invite_id: Some("ghost".into()),
            ..MessageInput::text("hi")
        };
        assert_eq!(
            code(engine.create_message(Some(&u1), &channel.id, with_missing_invite).await),
            ErrorCode::InviteNotFound
        );

        let emote = engine
            .create_emote(Some(&u1), &server.id, "wave", "https://e.example.com/w.png")
            .await
            .unwrap();
        let invite = engine
            .create_invite(Some(&u1), &server.id, None)
            .await
            .unwrap();
        let rich = MessageInput {
            content: "come join".into(),
            image_url: Some("https://img.example.com/a.png".into()),
            emote_ids: vec![emote.id.clone(), emote.id.clone()],
            invite_id: Some(invite.id.clone()),
        };
        let view = engine
            .create_message(Some(&u1), &channel.id, rich)
            .await
            .unwrap();

        let stored = engine.graph().message(&view.id).await.unwrap();
        assert_eq!(stored.emote_ids, vec![emote.id.clone(), emote.id]);
        assert_eq!(stored.invite_id, Some(invite.id));
        assert_eq!(stored.image_url, view.image_url);
        assert_eq!(stored.author, view.author);
    }

    #[tokio::test]
    async fn test_emote_permissions() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let url = "https://e.example.com/w.png";

        assert_eq!(
            code(engine.create_emote(Some(&u2), &server.id, "wave", url).await),
            ErrorCode::NotServerAdmin
        );
        assert_eq!(
            code(engine.create_emote(Some(&u1), &server.id, "no-dash", url).await),
            ErrorCode::InvalidInput
        );
        let emote = engine
            .create_emote(Some(&u1), &server.id, "wave", url)
            .await
            .unwrap();

        assert_eq!(
            code(engine.server_emotes(Some(&u2), &server.id).await),
            ErrorCode::NotServerMember
        );
        assert!(engine.my_emotes(Some(&u2)).await.unwrap().is_empty());
        assert_eq!(engine.my_emotes(Some(&u1)).await.unwrap().len(), 1);

        assert_eq!(
            code(engine.remove_emote(Some(&u2), &emote.id).await),
            ErrorCode::NotServerAdmin
        );
        engine.remove_emote(Some(&u1), &emote.id).await.unwrap();
        assert_eq!(
            code(engine.remove_emote(Some(&u1), &emote.id).await),
            ErrorCode::EmoteNotFound
        );
    }

    #[tokio::test]
    async fn test_invite_listing_and_removal() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        let server = engine.create_server(Some(&u1), "Home", None).await.unwrap();
        let invite = engine
            .create_invite(Some(&u1), &server.id, None)
            .await
            .unwrap();

        assert_eq!(
            code(engine.invites(Some(&u2), &server.id).await),
            ErrorCode::NotServerMember
        );
        assert_eq!(engine.invites(Some(&u1), &server.id).await.unwrap().len(), 1);

        engine.redeem_invite(Some(&u2), &invite.id).await.unwrap();
        assert_eq!(
            code(engine.remove_invite(Some(&u2), &invite.id).await),
            ErrorCode::NotServerAdmin
        );
        engine.remove_invite(Some(&u1), &invite.id).await.unwrap();
        assert_eq!(
            code(engine.invite(Some(&u2), &invite.id).await),
            ErrorCode::InviteNotFound
        );
    }

    #[tokio::test]
    async fn test_friend_request_protocol() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;

        assert_eq!(
            code(engine.send_friend_request(Some(&u1), "ghost").await),
            ErrorCode::UserNotFound
        );
        assert_eq!(
            code(engine.send_friend_request(Some(&u1), &u1).await),
            ErrorCode::OperationNotPermitted
        );

        engine.send_friend_request(Some(&u1), &u2).await.unwrap();
        assert_eq!(
            code(engine.send_friend_request(Some(&u1), &u2).await),
            ErrorCode::OperationNotPermitted
        );
        assert_eq!(
            code(engine.send_friend_request(Some(&u2), &u1).await),
            ErrorCode::OperationNotPermitted
        );
        // The requester cannot accept their own request.
        assert_eq!(
            code(engine.accept_friend_request(Some(&u1), &u2).await),
            ErrorCode::OperationNotPermitted
        );

        let detail = engine.user(Some(&u1), &u2).await.unwrap();
        assert!(detail.sent_friend_request);
        assert!(!detail.is_friend);

        engine.accept_friend_request(Some(&u2), &u1).await.unwrap();
        let detail = engine.user(Some(&u1), &u2).await.unwrap();
        assert!(detail.is_friend);
        assert!(!detail.sent_friend_request);

        let me = engine.me(Some(&u2)).await.unwrap();
        assert_eq!(me.friends.len(), 1);
        assert!(me.friend_requests.is_empty());

        assert_eq!(
            code(engine.send_friend_request(Some(&u2), &u1).await),
            ErrorCode::OperationNotPermitted
        );

        engine.remove_friend(Some(&u2), &u1).await.unwrap();
        assert_eq!(
            code(engine.remove_friend(Some(&u2), &u1).await),
            ErrorCode::OperationNotPermitted
        );
        let (ab, ba) = crate::db::queries::relations::friendship_edges(
            engine.graph().pool(),
            &u1,
            &u2,
        )
        .await
        .unwrap();
        assert!(!ab && !ba);
    }

    #[tokio::test]
    async fn test_decline_then_resend() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;

        engine.send_friend_request(Some(&u1), &u2).await.unwrap();
        assert_eq!(
            code(engine.decline_friend_request(Some(&u1), &u2).await),
            ErrorCode::OperationNotPermitted
        );
        engine.decline_friend_request(Some(&u2), &u1).await.unwrap();
        engine.send_friend_request(Some(&u1), &u2).await.unwrap();

        let me = engine.me(Some(&u1)).await.unwrap();
        assert_eq!(me.sent_friend_requests.len(), 1);
        assert!(me.friends.is_empty());
    }

    #[tokio::test]
    async fn test_open_subscription_requires_existing_channel() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let server = engine.create_server(Some(&u1), "home", None).await.unwrap();
        let channel = engine
            .create_channel(Some(&u1), &server.id, "general")
            .await
            .unwrap();

        assert_eq!(
            code(engine.open_subscription("missing").await),
            ErrorCode::ChannelNotFound
        );
        assert_eq!(engine.hub().subscriber_count("missing"), 0);

        let mut sub = engine.open_subscription(&channel.id).await.unwrap();
        assert_eq!(engine.hub().subscriber_count(&channel.id), 1);
        engine.delete_channel(Some(&u1), &channel.id).await.unwrap();
        assert!(sub.recv().await.is_none());
        assert_eq!(
            code(engine.open_subscription(&channel.id).await),
            ErrorCode::ChannelNotFound
        );
        assert_eq!(engine.hub().subscriber_count(&channel.id), 0);
    }

    #[tokio::test]
    async fn test_removing_one_sided_friendship_is_alerted() {
        let engine = engine().await;
        let u1 = register(&engine, "u1").await;
        let u2 = register(&engine, "u2").await;
        sqlx::query("INSERT INTO friendships (user_id, friend_id, created_at) VALUES (?, ?, ?)")
            .bind(&u1)
            .bind(&u2)
            .bind(Utc::now())
            .execute(engine.graph().pool())
            .await
            .unwrap();

        let err = engine.remove_friend(Some(&u1), &u2).await.unwrap_err();
        assert!(matches!(err, ChatError::Inconsistent(_)));
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert_eq!(engine.alerter().raised(), 1);

        let me = engine.me(Some(&u1)).await.unwrap();
        assert!(me.friends.is_empty());
    }
}
