use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{ChannelRow, EmoteRow, InviteRow, MessageRow, ServerRow, UserRow};

/// Event pushed to a live channel subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message was posted in the subscribed channel.
    Message(MessageView),
    /// The subscription ended on the server side (slow consumer, channel
    /// deleted, or shutdown). Clients re-page history before resubscribing.
    Closed { reason: String },
}

/// Minimal public view of a user, used wherever a user is referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

impl From<UserRow> for UserSummary {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            icon_url: row.icon_url,
        }
    }
}

/// Another user's public profile, as seen by the acting user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetail {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthday: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// The acting user is in this user's friend set.
    pub is_friend: bool,
    /// The acting user has a pending request to this user.
    pub sent_friend_request: bool,
}

/// The acting user's own profile with every relation expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthday: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub servers: Vec<ServerInfo>,
    pub owned_servers: Vec<ServerInfo>,
    pub friends: Vec<UserSummary>,
    pub friend_requests: Vec<UserSummary>,
    pub sent_friend_requests: Vec<UserSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<ServerRow> for ServerInfo {
    fn from(row: ServerRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            icon_url: row.icon_url,
            author_id: row.author_id,
            created_at: row.created_at,
        }
    }
}

/// A server with its relations eagerly expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDetail {
    #[serde(flatten)]
    pub info: ServerInfo,
    pub members: Vec<UserSummary>,
    pub channels: Vec<ChannelInfo>,
    pub invites: Vec<InviteView>,
    pub emotes: Vec<EmoteView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub server_id: String,
    pub author_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChannelRow> for ChannelInfo {
    fn from(row: ChannelRow) -> Self {
        Self {
            id: row.id,
            server_id: row.server_id,
            author_id: row.author_id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub channel_id: String,
    pub server_id: String,
    pub author: UserSummary,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emote_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageView {
    pub fn from_row(row: MessageRow, emote_ids: Vec<String>) -> Self {
        Self {
            id: row.id,
            channel_id: row.channel_id,
            server_id: row.server_id,
            author: UserSummary {
                id: row.author_id,
                name: row.author_name,
                icon_url: row.author_icon_url,
            },
            content: row.content,
            image_url: row.image_url,
            emote_ids,
            invite_id: row.invite_id,
            created_at: row.created_at,
        }
    }
}

/// One page of channel history, newest message first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub channel_id: String,
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteView {
    pub id: String,
    pub server_id: String,
    pub author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<InviteRow> for InviteView {
    fn from(row: InviteRow) -> Self {
        Self {
            id: row.id,
            server_id: row.server_id,
            author_id: row.author_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

/// What a prospective member sees before redeeming an invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitePreview {
    pub id: String,
    pub server: ServerInfo,
    pub author: UserSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoteView {
    pub id: String,
    pub server_id: String,
    pub author_id: String,
    pub name: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

impl From<EmoteRow> for EmoteView {
    fn from(row: EmoteRow) -> Self {
        Self {
            id: row.id,
            server_id: row.server_id,
            author_id: row.author_id,
            name: row.name,
            image_url: row.image_url,
            created_at: row.created_at,
        }
    }
}
