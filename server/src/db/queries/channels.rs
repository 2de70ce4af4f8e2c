use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::ChannelRow;

/// Create a channel in a server.
pub async fn create_channel(
    pool: &SqlitePool,
    id: &str,
    server_id: &str,
    author_id: &str,
    name: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO channels (id, server_id, author_id, name, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(server_id)
    .bind(author_id)
    .bind(name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get a channel by ID.
pub async fn get_channel(
    pool: &SqlitePool,
    channel_id: &str,
) -> Result<Option<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>("SELECT * FROM channels WHERE id = ?")
        .bind(channel_id)
        .fetch_optional(pool)
        .await
}

/// List a server's channels in creation order.
pub async fn list_channels(
    pool: &SqlitePool,
    server_id: &str,
) -> Result<Vec<ChannelRow>, sqlx::Error> {
    sqlx::query_as::<_, ChannelRow>(
        "SELECT * FROM channels WHERE server_id = ? ORDER BY created_at, rowid",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await
}

/// Delete a channel. Messages go with it (cascade). Returns false if it did
/// not exist.
pub async fn delete_channel(pool: &SqlitePool, channel_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM channels WHERE id = ?")
        .bind(channel_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
