use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored user. The id is the identity provider's external user id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub birthday: Option<DateTime<Utc>>,
    pub icon_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored server (community).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ServerRow {
    pub id: String,
    pub name: String,
    pub icon_url: Option<String>,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored channel.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChannelRow {
    pub id: String,
    pub server_id: String,
    pub author_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored message, joined with its channel's server and its author's
/// display fields.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub server_id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_icon_url: Option<String>,
    pub content: String,
    pub image_url: Option<String>,
    pub invite_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored invite.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct InviteRow {
    pub id: String,
    pub server_id: String,
    pub author_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InviteRow {
    /// An invite is expired once its expiry instant has been reached.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// A stored custom emote.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmoteRow {
    pub id: String,
    pub server_id: String,
    pub author_id: String,
    pub name: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for inserting a user (avoids too-many-arguments).
pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub birthday: Option<DateTime<Utc>>,
    pub icon_url: Option<&'a str>,
}

/// Parameters for inserting a message.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub channel_id: &'a str,
    pub author_id: &'a str,
    pub content: &'a str,
    pub image_url: Option<&'a str>,
    pub invite_id: Option<&'a str>,
    pub emote_ids: &'a [String],
}

/// Outcome of adding a user to a server's member set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberInsert {
    Added,
    AlreadyMember,
    ServerMissing,
}
