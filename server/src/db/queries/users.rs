use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{NewUser, UserRow};

/// Insert a user. Returns false if a user with this id already exists.
pub async fn create_user(
    pool: &SqlitePool,
    user: &NewUser<'_>,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO users (id, name, email, birthday, icon_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user.id)
    .bind(user.name)
    .bind(user.email)
    .bind(user.birthday)
    .bind(user.icon_url)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Get a user by ID.
pub async fn get_user(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Replace a user's avatar URL. Returns false if the user does not exist.
pub async fn set_icon(
    pool: &SqlitePool,
    user_id: &str,
    icon_url: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET icon_url = ?, updated_at = ? WHERE id = ?")
        .bind(icon_url)
        .bind(now)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
