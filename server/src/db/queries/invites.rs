use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::InviteRow;

/// Create an invite for a server.
pub async fn create_invite(
    pool: &SqlitePool,
    id: &str,
    server_id: &str,
    author_id: &str,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO invites (id, server_id, author_id, expires_at, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(server_id)
    .bind(author_id)
    .bind(expires_at)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Get an invite by ID.
pub async fn get_invite(
    pool: &SqlitePool,
    invite_id: &str,
) -> Result<Option<InviteRow>, sqlx::Error> {
    sqlx::query_as::<_, InviteRow>("SELECT * FROM invites WHERE id = ?")
        .bind(invite_id)
        .fetch_optional(pool)
        .await
}

/// List all invites for a server, oldest first.
pub async fn list_server_invites(
    pool: &SqlitePool,
    server_id: &str,
) -> Result<Vec<InviteRow>, sqlx::Error> {
    sqlx::query_as::<_, InviteRow>(
        "SELECT * FROM invites WHERE server_id = ? ORDER BY created_at, rowid",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await
}

/// Delete an invite. Messages that carried it keep existing without it.
pub async fn delete_invite(pool: &SqlitePool, invite_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM invites WHERE id = ?")
        .bind(invite_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
