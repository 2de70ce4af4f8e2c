use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{MessageRow, NewMessage};

const MESSAGE_COLUMNS: &str = "SELECT m.id, m.channel_id, c.server_id, m.author_id, \
     u.name AS author_name, u.icon_url AS author_icon_url, \
     m.content, m.image_url, m.invite_id, m.created_at, m.updated_at \
     FROM messages m \
     JOIN channels c ON c.id = m.channel_id \
     JOIN users u ON u.id = m.author_id";

/// Insert a message and its ordered emote references in one transaction.
pub async fn insert_message(
    pool: &SqlitePool,
    message: &NewMessage<'_>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO messages (id, channel_id, author_id, content, image_url, invite_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(message.id)
    .bind(message.channel_id)
    .bind(message.author_id)
    .bind(message.content)
    .bind(message.image_url)
    .bind(message.invite_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    for (position, emote_id) in message.emote_ids.iter().enumerate() {
        sqlx::query("INSERT INTO message_emotes (message_id, position, emote_id) VALUES (?, ?, ?)")
            .bind(message.id)
            .bind(position as i64)
            .bind(emote_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

/// Get a single message with its author's display fields.
pub async fn get_message(
    pool: &SqlitePool,
    message_id: &str,
) -> Result<Option<MessageRow>, sqlx::Error> {
    let sql = format!("{MESSAGE_COLUMNS} WHERE m.id = ?");
    sqlx::query_as::<_, MessageRow>(&sql)
        .bind(message_id)
        .fetch_optional(pool)
        .await
}

/// Fetch channel history, newest first. With `before`, only messages
/// created before that message are returned. An unknown `before` id yields
/// an empty page.
pub async fn fetch_channel_history(
    pool: &SqlitePool,
    channel_id: &str,
    before: Option<&str>,
    limit: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let sql = format!(
        "{MESSAGE_COLUMNS} WHERE m.channel_id = ? \
         AND (? IS NULL OR m.rowid < (SELECT rowid FROM messages WHERE id = ?)) \
         ORDER BY m.rowid DESC LIMIT ?"
    );
    sqlx::query_as::<_, MessageRow>(&sql)
        .bind(channel_id)
        .bind(before)
        .bind(before)
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Emote ids referenced by each of the given messages, in message order.
pub async fn emote_ids_for_messages(
    pool: &SqlitePool,
    message_ids: &[String],
) -> Result<HashMap<String, Vec<String>>, sqlx::Error> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders: Vec<&str> = message_ids.iter().map(|_| "?").collect();
    let sql = format!(
        "SELECT message_id, emote_id FROM message_emotes \
         WHERE message_id IN ({}) ORDER BY message_id, position",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_as::<_, (String, String)>(&sql);
    for id in message_ids {
        query = query.bind(id);
    }

    let mut by_message: HashMap<String, Vec<String>> = HashMap::new();
    for (message_id, emote_id) in query.fetch_all(pool).await? {
        by_message.entry(message_id).or_default().push(emote_id);
    }
    Ok(by_message)
}
