use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{MemberInsert, ServerRow, UserRow};

/// Create a new server. The author's membership row is written in the same
/// transaction, so a server is never visible without its author as a member.
pub async fn create_server(
    pool: &SqlitePool,
    id: &str,
    name: &str,
    author_id: &str,
    icon_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO servers (id, name, icon_url, author_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(icon_url)
    .bind(author_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO server_members (server_id, user_id, joined_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(author_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await
}

/// Get a server by ID.
pub async fn get_server(
    pool: &SqlitePool,
    server_id: &str,
) -> Result<Option<ServerRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerRow>("SELECT * FROM servers WHERE id = ?")
        .bind(server_id)
        .fetch_optional(pool)
        .await
}

/// List all servers a user is a member of, oldest membership first.
pub async fn list_servers_for_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<ServerRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerRow>(
        "SELECT s.* FROM servers s \
         JOIN server_members sm ON s.id = sm.server_id \
         WHERE sm.user_id = ? \
         ORDER BY sm.joined_at, s.rowid",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// List the servers a user created.
pub async fn list_servers_owned(
    pool: &SqlitePool,
    author_id: &str,
) -> Result<Vec<ServerRow>, sqlx::Error> {
    sqlx::query_as::<_, ServerRow>(
        "SELECT * FROM servers WHERE author_id = ? ORDER BY created_at, rowid",
    )
    .bind(author_id)
    .fetch_all(pool)
    .await
}

/// Replace a server's icon. Returns false if the server does not exist.
pub async fn set_icon(
    pool: &SqlitePool,
    server_id: &str,
    icon_url: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE servers SET icon_url = ?, updated_at = ? WHERE id = ?")
        .bind(icon_url)
        .bind(now)
        .bind(server_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Add a user to a server's member set. The existence check and the insert
/// share one transaction so a concurrently deleted server is reported as
/// missing rather than as a foreign-key failure.
pub async fn add_server_member(
    pool: &SqlitePool,
    server_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<MemberInsert, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM servers WHERE id = ?")
        .bind(server_id)
        .fetch_one(&mut *tx)
        .await?;
    if !exists {
        return Ok(MemberInsert::ServerMissing);
    }

    let result = sqlx::query(
        "INSERT OR IGNORE INTO server_members (server_id, user_id, joined_at) VALUES (?, ?, ?)",
    )
    .bind(server_id)
    .bind(user_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(if result.rows_affected() == 1 {
        MemberInsert::Added
    } else {
        MemberInsert::AlreadyMember
    })
}

/// Remove a user from a server. Returns false if they were not a member.
/// The store rejects removing the server's author.
pub async fn remove_server_member(
    pool: &SqlitePool,
    server_id: &str,
    user_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM server_members WHERE server_id = ? AND user_id = ?")
        .bind(server_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// All member ids of a server.
pub async fn member_ids(pool: &SqlitePool, server_id: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT user_id FROM server_members WHERE server_id = ? ORDER BY joined_at, rowid",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await
}

/// All members of a server as user rows, in join order.
pub async fn get_server_members(
    pool: &SqlitePool,
    server_id: &str,
) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as::<_, UserRow>(
        "SELECT u.* FROM users u \
         JOIN server_members sm ON u.id = sm.user_id \
         WHERE sm.server_id = ? \
         ORDER BY sm.joined_at, sm.rowid",
    )
    .bind(server_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewUser;
    use crate::db::pool::{create_pool, run_migrations};
    use crate::db::queries::users;

    async fn setup_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        for (id, name) in [("u1", "alice"), ("u2", "bob")] {
            let user = NewUser {
                id,
                name,
                email: "x@example.com",
                birthday: None,
                icon_url: None,
            };
            users::create_user(&pool, &user, Utc::now()).await.unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_create_server_adds_author_as_member() {
        let pool = setup_db().await;
        create_server(&pool, "s1", "Test Server", "u1", None, Utc::now())
            .await
            .unwrap();

        let server = get_server(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(server.name, "Test Server");
        assert_eq!(server.author_id, "u1");
        assert_eq!(member_ids(&pool, "s1").await.unwrap(), vec!["u1"]);
    }

    #[tokio::test]
    async fn test_create_server_for_missing_author_leaves_nothing_behind() {
        let pool = setup_db().await;
        assert!(create_server(&pool, "s1", "Ghost", "ghost", None, Utc::now())
            .await
            .is_err());
        assert!(get_server(&pool, "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_member_outcomes() {
        let pool = setup_db().await;
        create_server(&pool, "s1", "Test", "u1", None, Utc::now())
            .await
            .unwrap();

        assert_eq!(
            add_server_member(&pool, "s1", "u2", Utc::now()).await.unwrap(),
            MemberInsert::Added
        );
        assert_eq!(
            add_server_member(&pool, "s1", "u2", Utc::now()).await.unwrap(),
            MemberInsert::AlreadyMember
        );
        assert_eq!(
            add_server_member(&pool, "nope", "u2", Utc::now()).await.unwrap(),
            MemberInsert::ServerMissing
        );

        let members = get_server_members(&pool, "s1").await.unwrap();
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_remove_member() {
        let pool = setup_db().await;
        create_server(&pool, "s1", "Test", "u1", None, Utc::now())
            .await
            .unwrap();
        add_server_member(&pool, "s1", "u2", Utc::now()).await.unwrap();

        assert!(remove_server_member(&pool, "s1", "u2").await.unwrap());
        assert!(!remove_server_member(&pool, "s1", "u2").await.unwrap());
        assert_eq!(member_ids(&pool, "s1").await.unwrap(), vec!["u1"]);
    }

    #[tokio::test]
    async fn test_store_refuses_to_remove_author() {
        let pool = setup_db().await;
        create_server(&pool, "s1", "Test", "u1", None, Utc::now())
            .await
            .unwrap();

        assert!(remove_server_member(&pool, "s1", "u1").await.is_err());
        assert_eq!(member_ids(&pool, "s1").await.unwrap(), vec!["u1"]);
    }

    #[tokio::test]
    async fn test_list_servers_for_user_and_owned() {
        let pool = setup_db().await;
        create_server(&pool, "s1", "Alpha", "u1", None, Utc::now())
            .await
            .unwrap();
        create_server(&pool, "s2", "Beta", "u2", None, Utc::now())
            .await
            .unwrap();
        add_server_member(&pool, "s2", "u1", Utc::now()).await.unwrap();

        let joined = list_servers_for_user(&pool, "u1").await.unwrap();
        assert_eq!(joined.len(), 2);
        let owned = list_servers_owned(&pool, "u1").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].id, "s1");
    }

    #[tokio::test]
    async fn test_set_icon() {
        let pool = setup_db().await;
        create_server(&pool, "s1", "Test", "u1", None, Utc::now())
            .await
            .unwrap();
        assert!(set_icon(&pool, "s1", "https://cdn.example.com/i.png", Utc::now())
            .await
            .unwrap());
        let server = get_server(&pool, "s1").await.unwrap().unwrap();
        assert_eq!(server.icon_url.as_deref(), Some("https://cdn.example.com/i.png"));
        assert!(!set_icon(&pool, "nope", "https://cdn.example.com/i.png", Utc::now())
            .await
            .unwrap());
    }
}
