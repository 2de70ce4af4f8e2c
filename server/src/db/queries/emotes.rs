use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::EmoteRow;

/// Create a custom emote in a server.
pub async fn create_emote(
    pool: &SqlitePool,
    id: &str,
    server_id: &str,
    author_id: &str,
    name: &str,
    image_url: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO emotes (id, server_id, author_id, name, image_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(server_id)
    .bind(author_id)
    .bind(name)
    .bind(image_url)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get an emote by ID.
pub async fn get_emote(pool: &SqlitePool, emote_id: &str) -> Result<Option<EmoteRow>, sqlx::Error> {
    sqlx::query_as::<_, EmoteRow>("SELECT * FROM emotes WHERE id = ?")
        .bind(emote_id)
        .fetch_optional(pool)
        .await
}

/// List all emotes for a server.
pub async fn list_server_emotes(
    pool: &SqlitePool,
    server_id: &str,
) -> Result<Vec<EmoteRow>, sqlx::Error> {
    sqlx::query_as::<_, EmoteRow>(
        "SELECT * FROM emotes WHERE server_id = ? ORDER BY created_at, rowid",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await
}

/// List the emotes of every server a user belongs to.
pub async fn list_emotes_for_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<EmoteRow>, sqlx::Error> {
    sqlx::query_as::<_, EmoteRow>(
        "SELECT e.* FROM emotes e \
         JOIN server_members sm ON e.server_id = sm.server_id \
         WHERE sm.user_id = ? \
         ORDER BY e.created_at, e.rowid",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// The subset of `ids` that name existing emotes.
pub async fn existing_emote_ids(
    pool: &SqlitePool,
    ids: &[String],
) -> Result<HashSet<String>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(HashSet::new());
    }
    let placeholders: Vec<&str> = ids.iter().map(|_| "?").collect();
    let sql = format!(
        "SELECT id FROM emotes WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut query = sqlx::query_scalar::<_, String>(&sql);
    for id in ids {
        query = query.bind(id);
    }
    Ok(query.fetch_all(pool).await?.into_iter().collect())
}

/// Delete an emote. Returns true if a row was deleted.
pub async fn delete_emote(pool: &SqlitePool, emote_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM emotes WHERE id = ?")
        .bind(emote_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
