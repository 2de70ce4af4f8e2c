use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::error;

use crate::db::models::{
    ChannelRow, EmoteRow, InviteRow, MemberInsert, MessageRow, NewMessage, NewUser, ServerRow,
    UserRow,
};
use crate::db::queries::{channels, emotes, invites, messages, relations, servers, users};

use super::alerts::Alerter;
use super::error::{ChatError, ChatResult, EntityKind};
use super::events::{
    ChannelInfo, EmoteView, InviteView, MessageView, ServerDetail, ServerInfo, UserProfile,
    UserSummary,
};
use super::permissions::{ServerAccess, UserRelations};

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed access to the persisted entity graph.
///
/// Every store call is bounded by a timeout. A failed or timed-out call is
/// alerted and surfaces as `ChatError::Unknown`; the graph never retries on
/// its own. Lookups that must find something return `NotFound` with the
/// entity kind. No authorization happens here.
#[derive(Clone)]
pub struct EntityGraph {
    pool: SqlitePool,
    timeout: Duration,
    alerter: Alerter,
}

impl EntityGraph {
    pub fn new(pool: SqlitePool, timeout: Duration, alerter: Alerter) -> Self {
        Self {
            pool,
            timeout,
            alerter,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn alerter(&self) -> &Alerter {
        &self.alerter
    }

    async fn call<T, F>(&self, what: &'static str, fut: F) -> ChatResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(error = %e, op = what, "store call failed");
                self.alerter.alert(&format!("store call `{what}` failed: {e}"));
                Err(e.into())
            }
            Err(_) => {
                error!(op = what, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                self.alerter.alert(&format!("store call `{what}` timed out"));
                Err(ChatError::Unknown(format!("store call `{what}` timed out")))
            }
        }
    }

    fn found<T>(value: Option<T>, kind: EntityKind) -> ChatResult<T> {
        value.ok_or(ChatError::NotFound(kind))
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserRow>> {
        self.call("get_user", users::get_user(&self.pool, user_id))
            .await
    }

    pub async fn user(&self, user_id: &str) -> ChatResult<UserRow> {
        Self::found(self.find_user(user_id).await?, EntityKind::User)
    }

    pub async fn server(&self, server_id: &str) -> ChatResult<ServerRow> {
        let row = self
            .call("get_server", servers::get_server(&self.pool, server_id))
            .await?;
        Self::found(row, EntityKind::Server)
    }

    /// The server's author and member set, for the guard.
    pub async fn server_access(&self, server_id: &str) -> ChatResult<ServerAccess> {
        let server = self.server(server_id).await?;
        let members = self
            .call("member_ids", servers::member_ids(&self.pool, server_id))
            .await?;
        Ok(ServerAccess {
            server_id: server.id,
            author_id: server.author_id,
            members: members.into_iter().collect(),
        })
    }

    pub async fn channel(&self, channel_id: &str) -> ChatResult<ChannelRow> {
        let row = self
            .call("get_channel", channels::get_channel(&self.pool, channel_id))
            .await?;
        Self::found(row, EntityKind::Channel)
    }

    pub async fn invite(&self, invite_id: &str) -> ChatResult<InviteRow> {
        let row = self
            .call("get_invite", invites::get_invite(&self.pool, invite_id))
            .await?;
        Self::found(row, EntityKind::Invite)
    }

    pub async fn emote(&self, emote_id: &str) -> ChatResult<EmoteRow> {
        let row = self
            .call("get_emote", emotes::get_emote(&self.pool, emote_id))
            .await?;
        Self::found(row, EntityKind::Emote)
    }

    pub async fn message(&self, message_id: &str) -> ChatResult<MessageView> {
        let row = self
            .call("get_message", messages::get_message(&self.pool, message_id))
            .await?;
        let row = Self::found(row, EntityKind::Message)?;
        let mut views = self.message_views(vec![row]).await?;
        views.pop().ok_or(ChatError::NotFound(EntityKind::Message))
    }

    /// Fails with `EmoteNotFound` unless every id names an existing emote.
    pub async fn require_emotes(&self, emote_ids: &[String]) -> ChatResult<()> {
        let existing = self
            .call(
                "existing_emote_ids",
                emotes::existing_emote_ids(&self.pool, emote_ids),
            )
            .await?;
        if emote_ids.iter().all(|id| existing.contains(id)) {
            Ok(())
        } else {
            Err(ChatError::NotFound(EntityKind::Emote))
        }
    }

    pub async fn user_relations(&self, user_id: &str) -> ChatResult<UserRelations> {
        let friends = self
            .call("friend_ids", relations::friend_ids(&self.pool, user_id))
            .await?;
        let incoming = self
            .call(
                "incoming_request_ids",
                relations::incoming_request_ids(&self.pool, user_id),
            )
            .await?;
        let outgoing = self
            .call(
                "outgoing_request_ids",
                relations::outgoing_request_ids(&self.pool, user_id),
            )
            .await?;
        Ok(UserRelations {
            user_id: user_id.to_string(),
            friends: friends.into_iter().collect(),
            incoming: incoming.into_iter().collect(),
            outgoing: outgoing.into_iter().collect(),
        })
    }

    // ── Eager expansion ─────────────────────────────────────────────

    pub async fn servers_for_user(&self, user_id: &str) -> ChatResult<Vec<ServerInfo>> {
        let rows = self
            .call(
                "list_servers_for_user",
                servers::list_servers_for_user(&self.pool, user_id),
            )
            .await?;
        Ok(rows.into_iter().map(ServerInfo::from).collect())
    }

    pub async fn channels_of(&self, server_id: &str) -> ChatResult<Vec<ChannelInfo>> {
        let rows = self
            .call("list_channels", channels::list_channels(&self.pool, server_id))
            .await?;
        Ok(rows.into_iter().map(ChannelInfo::from).collect())
    }

    pub async fn invites_of(&self, server_id: &str) -> ChatResult<Vec<InviteView>> {
        let rows = self
            .call(
                "list_server_invites",
                invites::list_server_invites(&self.pool, server_id),
            )
            .await?;
        Ok(rows.into_iter().map(InviteView::from).collect())
    }

    pub async fn emotes_of(&self, server_id: &str) -> ChatResult<Vec<EmoteView>> {
        let rows = self
            .call(
                "list_server_emotes",
                emotes::list_server_emotes(&self.pool, server_id),
            )
            .await?;
        Ok(rows.into_iter().map(EmoteView::from).collect())
    }

    pub async fn emotes_for_user(&self, user_id: &str) -> ChatResult<Vec<EmoteView>> {
        let rows = self
            .call(
                "list_emotes_for_user",
                emotes::list_emotes_for_user(&self.pool, user_id),
            )
            .await?;
        Ok(rows.into_iter().map(EmoteView::from).collect())
    }

    /// A server with members, channels, invites and emotes loaded.
    pub async fn server_detail(&self, server: ServerRow) -> ChatResult<ServerDetail> {
        let members = self
            .call(
                "get_server_members",
                servers::get_server_members(&self.pool, &server.id),
            )
            .await?;
        let channels = self.channels_of(&server.id).await?;
        let invites = self.invites_of(&server.id).await?;
        let emotes = self.emotes_of(&server.id).await?;
        Ok(ServerDetail {
            info: server.into(),
            members: members.into_iter().map(UserSummary::from).collect(),
            channels,
            invites,
            emotes,
        })
    }

    /// A user's own profile with servers and friend edges loaded.
    pub async fn user_profile(&self, user: UserRow) -> ChatResult<UserProfile> {
        let servers = self.servers_for_user(&user.id).await?;
        let owned = self
            .call(
                "list_servers_owned",
                servers::list_servers_owned(&self.pool, &user.id),
            )
            .await?;
        let friends = self
            .call("list_friends", relations::list_friends(&self.pool, &user.id))
            .await?;
        let incoming = self
            .call(
                "list_incoming_requests",
                relations::list_incoming_requests(&self.pool, &user.id),
            )
            .await?;
        let outgoing = self
            .call(
                "list_outgoing_requests",
                relations::list_outgoing_requests(&self.pool, &user.id),
            )
            .await?;

        let summaries = |rows: Vec<UserRow>| -> Vec<UserSummary> {
            rows.into_iter().map(UserSummary::from).collect()
        };
        Ok(UserProfile {
            id: user.id,
            name: user.name,
            email: user.email,
            birthday: user.birthday,
            icon_url: user.icon_url,
            created_at: user.created_at,
            updated_at: user.updated_at,
            servers,
            owned_servers: owned.into_iter().map(ServerInfo::from).collect(),
            friends: summaries(friends),
            friend_requests: summaries(incoming),
            sent_friend_requests: summaries(outgoing),
        })
    }

    async fn message_views(&self, rows: Vec<MessageRow>) -> ChatResult<Vec<MessageView>> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut emote_ids = self
            .call(
                "emote_ids_for_messages",
                messages::emote_ids_for_messages(&self.pool, &ids),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let refs = emote_ids.remove(&row.id).unwrap_or_default();
                MessageView::from_row(row, refs)
            })
            .collect())
    }

    /// One page of history, newest first, and whether older messages exist.
    pub async fn history(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: u32,
    ) -> ChatResult<(Vec<MessageView>, bool)> {
        let mut rows = self
            .call(
                "fetch_channel_history",
                messages::fetch_channel_history(&self.pool, channel_id, before, i64::from(limit) + 1),
            )
            .await?;
        let has_more = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        Ok((self.message_views(rows).await?, has_more))
    }

    // ── Writes ──────────────────────────────────────────────────────

    pub async fn create_user(&self, user: &NewUser<'_>, now: DateTime<Utc>) -> ChatResult<bool> {
        self.call("create_user", users::create_user(&self.pool, user, now))
            .await
    }

    pub async fn set_user_icon(
        &self,
        user_id: &str,
        icon_url: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        let updated = self
            .call(
                "set_user_icon",
                users::set_icon(&self.pool, user_id, icon_url, now),
            )
            .await?;
        if updated {
            Ok(())
        } else {
            Err(ChatError::NotFound(EntityKind::User))
        }
    }

    pub async fn create_server(
        &self,
        id: &str,
        name: &str,
        author_id: &str,
        icon_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        self.call(
            "create_server",
            servers::create_server(&self.pool, id, name, author_id, icon_url, now),
        )
        .await
    }

    pub async fn set_server_icon(
        &self,
        server_id: &str,
        icon_url: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        let updated = self
            .call(
                "set_server_icon",
                servers::set_icon(&self.pool, server_id, icon_url, now),
            )
            .await?;
        if updated {
            Ok(())
        } else {
            Err(ChatError::NotFound(EntityKind::Server))
        }
    }

    /// Add a member. Fails with `ServerNotFound` if the server is gone;
    /// returns false if the user was already a member.
    pub async fn add_member(
        &self,
        server_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<bool> {
        let outcome = self
            .call(
                "add_server_member",
                servers::add_server_member(&self.pool, server_id, user_id, now),
            )
            .await?;
        match outcome {
            MemberInsert::Added => Ok(true),
            MemberInsert::AlreadyMember => Ok(false),
            MemberInsert::ServerMissing => Err(ChatError::NotFound(EntityKind::Server)),
        }
    }

    pub async fn remove_member(&self, server_id: &str, user_id: &str) -> ChatResult<bool> {
        self.call(
            "remove_server_member",
            servers::remove_server_member(&self.pool, server_id, user_id),
        )
        .await
    }

    pub async fn create_channel(
        &self,
        id: &str,
        server_id: &str,
        author_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        self.call(
            "create_channel",
            channels::create_channel(&self.pool, id, server_id, author_id, name, now),
        )
        .await
    }

    pub async fn delete_channel(&self, channel_id: &str) -> ChatResult<bool> {
        self.call("delete_channel", channels::delete_channel(&self.pool, channel_id))
            .await
    }

    pub async fn create_invite(
        &self,
        id: &str,
        server_id: &str,
        author_id: &str,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        self.call(
            "create_invite",
            invites::create_invite(&self.pool, id, server_id, author_id, expires_at, now),
        )
        .await
    }

    pub async fn delete_invite(&self, invite_id: &str) -> ChatResult<bool> {
        self.call("delete_invite", invites::delete_invite(&self.pool, invite_id))
            .await
    }

    pub async fn create_emote(&self, emote: &EmoteRow) -> ChatResult<()> {
        self.call(
            "create_emote",
            emotes::create_emote(
                &self.pool,
                &emote.id,
                &emote.server_id,
                &emote.author_id,
                &emote.name,
                &emote.image_url,
                emote.created_at,
            ),
        )
        .await
    }

    pub async fn delete_emote(&self, emote_id: &str) -> ChatResult<bool> {
        self.call("delete_emote", emotes::delete_emote(&self.pool, emote_id))
            .await
    }

    pub async fn insert_message(
        &self,
        message: &NewMessage<'_>,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        self.call(
            "insert_message",
            messages::insert_message(&self.pool, message, now),
        )
        .await
    }

    pub async fn insert_friend_request(
        &self,
        requester_id: &str,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<bool> {
        self.call(
            "insert_friend_request",
            relations::insert_friend_request(&self.pool, requester_id, target_id, now),
        )
        .await
    }

    pub async fn delete_friend_request(
        &self,
        requester_id: &str,
        target_id: &str,
    ) -> ChatResult<bool> {
        self.call(
            "delete_friend_request",
            relations::delete_friend_request(&self.pool, requester_id, target_id),
        )
        .await
    }

    pub async fn accept_friend_request(
        &self,
        requester_id: &str,
        target_id: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<bool> {
        self.call(
            "accept_friend_request",
            relations::accept_friend_request(&self.pool, requester_id, target_id, now),
        )
        .await
    }

    pub async fn remove_friendship(&self, user_id: &str, friend_id: &str) -> ChatResult<u64> {
        self.call(
            "remove_friendship",
            relations::remove_friendship(&self.pool, user_id, friend_id),
        )
        .await
    }

    /// Re-read both directed friendship edges after a write and check they
    /// agree with `expected`. A one-sided edge is reported as
    /// `Inconsistent` and alerted.
    pub async fn verify_friendship(&self, a: &str, b: &str, expected: bool) -> ChatResult<()> {
        let (ab, ba) = self
            .call("friendship_edges", relations::friendship_edges(&self.pool, a, b))
            .await?;
        if ab == expected && ba == expected {
            return Ok(());
        }
        let detail = format!(
            "friendship edges between {a} and {b} are ({ab}, {ba}), expected both {expected}"
        );
        error!(%a, %b, ab, ba, expected, "friendship invariant violated");
        self.alerter.alert(&detail);
        Err(ChatError::Inconsistent(detail))
    }
}
