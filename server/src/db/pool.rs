use sqlx::Connection;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Schema files, applied in order. The version is the position in this list.
const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("../../migrations/001_initial.sql")),
    (2, include_str!("../../migrations/002_relations.sql")),
];

/// Create a SQLite connection pool with WAL mode and foreign keys enforced.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    info!(%database_url, max_connections, "database connected");
    Ok(pool)
}

/// Split a migration file into statements. Semicolons inside a
/// `BEGIN ... END` trigger body do not terminate the statement.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_trigger_body = false;

    fn flush(buf: &mut String, out: &mut Vec<String>) {
        let stmt = buf.trim();
        let stmt = stmt.strip_suffix(';').unwrap_or(stmt).trim();
        if !stmt.is_empty() && !stmt.starts_with("--") {
            out.push(stmt.to_string());
        }
        buf.clear();
    }

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") && current.trim().is_empty() {
            continue;
        }

        current.push_str(line);
        current.push('\n');

        let upper = trimmed.to_uppercase();
        if upper == "BEGIN" || upper.ends_with(" BEGIN") {
            in_trigger_body = true;
            continue;
        }

        if in_trigger_body {
            if upper == "END;" || upper == "END" {
                in_trigger_body = false;
                flush(&mut current, &mut statements);
            }
            continue;
        }

        while let Some(pos) = current.find(';') {
            let mut head: String = current.drain(..=pos).collect();
            flush(&mut head, &mut statements);
        }
    }

    flush(&mut current, &mut statements);
    statements
}

/// Apply every migration newer than the recorded schema version. Each
/// migration runs in its own transaction together with its version row.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (\
            version     INTEGER PRIMARY KEY, \
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))\
        )",
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await?;

    for &(version, sql) in MIGRATIONS {
        if version <= current_version {
            continue;
        }
        info!(version, "applying migration");

        let mut conn = pool.acquire().await?;
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await?;

        let result: Result<(), sqlx::Error> = async {
            let mut tx = conn.begin().await?;
            for statement in split_sql_statements(sql) {
                sqlx::query(&statement).execute(&mut *tx).await?;
            }
            sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(())
        }
        .await;

        // Re-enable even when the migration failed; the connection goes back to the pool.
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await?;
        result?;
    }

    let final_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0);
    info!(version = final_version, "database migrations applied");
    Ok(())
}
