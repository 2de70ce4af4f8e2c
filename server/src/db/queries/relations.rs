use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::UserRow;

/// Record a pending request from `requester_id` to `target_id`. Nothing is
/// written (and false is returned) if the pair are already friends or a
/// request already exists in either direction.
pub async fn insert_friend_request(
    pool: &SqlitePool,
    requester_id: &str,
    target_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO friend_requests (requester_id, target_id, created_at) \
         SELECT ?1, ?2, ?3 \
         WHERE NOT EXISTS (SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2) \
         AND NOT EXISTS (SELECT 1 FROM friend_requests WHERE requester_id = ?2 AND target_id = ?1)",
    )
    .bind(requester_id)
    .bind(target_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Check for a pending request from `requester_id` to `target_id`.
#[cfg(test)]
pub async fn has_friend_request(
    pool: &SqlitePool,
    requester_id: &str,
    target_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM friend_requests WHERE requester_id = ? AND target_id = ?",
    )
    .bind(requester_id)
    .bind(target_id)
    .fetch_one(pool)
    .await
}

/// Drop a pending request. Returns false if there was none.
pub async fn delete_friend_request(
    pool: &SqlitePool,
    requester_id: &str,
    target_id: &str,
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM friend_requests WHERE requester_id = ? AND target_id = ?")
            .bind(requester_id)
            .bind(target_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Consume the pending request `requester_id -> target_id` into a friendship.
/// Both directed edges are written together with the request removal, and
/// any request in the opposite direction is cleared too. Returns false (and
/// writes nothing) if no such request was pending.
pub async fn accept_friend_request(
    pool: &SqlitePool,
    requester_id: &str,
    target_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let consumed =
        sqlx::query("DELETE FROM friend_requests WHERE requester_id = ? AND target_id = ?")
            .bind(requester_id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
    if consumed.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("DELETE FROM friend_requests WHERE requester_id = ? AND target_id = ?")
        .bind(target_id)
        .bind(requester_id)
        .execute(&mut *tx)
        .await?;

    for (user_id, friend_id) in [(requester_id, target_id), (target_id, requester_id)] {
        sqlx::query(
            "INSERT OR IGNORE INTO friendships (user_id, friend_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(friend_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Remove both directed friendship edges between two users. Returns the
/// number of edges deleted (0 if they were not friends).
pub async fn remove_friendship(
    pool: &SqlitePool,
    user_id: &str,
    friend_id: &str,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut removed = 0;
    for (a, b) in [(user_id, friend_id), (friend_id, user_id)] {
        removed += sqlx::query("DELETE FROM friendships WHERE user_id = ? AND friend_id = ?")
            .bind(a)
            .bind(b)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;
    Ok(removed)
}

/// Presence of the two directed friendship edges `(a -> b, b -> a)`.
pub async fn friendship_edges(
    pool: &SqlitePool,
    a: &str,
    b: &str,
) -> Result<(bool, bool), sqlx::Error> {
    sqlx::query_as::<_, (bool, bool)>(
        "SELECT \
         EXISTS (SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2), \
         EXISTS (SELECT 1 FROM friendships WHERE user_id = ?2 AND friend_id = ?1)",
    )
    .bind(a)
    .bind(b)
    .fetch_one(pool)
    .await
}

/// Ids of a user's friends.
pub async fn friend_ids(pool: &SqlitePool, user_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT friend_id FROM friendships WHERE user_id = ? ORDER BY created_at")
        .bind(user_id)
        .fetch_all(pool)
        .await
}

/// Ids of users with a pending request to `user_id`.
pub async fn incoming_request_ids(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT requester_id FROM friend_requests WHERE target_id = ? ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Ids of users `user_id` has a pending request to.
pub async fn outgoing_request_ids(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT target_id FROM friend_requests WHERE requester_id = ? ORDER BY created_at",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// A user's friends as user rows.
pub async fn list_friends(pool: &SqlitePool, user_id: &str) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT u.* FROM users u JOIN friendships f ON u.id = f.friend_id \
         WHERE f.user_id = ? ORDER BY f.created_at, u.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Users who have sent `user_id` a pending request.
pub async fn list_incoming_requests(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT u.* FROM users u JOIN friend_requests r ON u.id = r.requester_id \
         WHERE r.target_id = ? ORDER BY r.created_at, u.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Users `user_id` has sent a pending request to.
pub async fn list_outgoing_requests(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT u.* FROM users u JOIN friend_requests r ON u.id = r.target_id \
         WHERE r.requester_id = ? ORDER BY r.created_at, u.name",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}
