//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time, so checkpoints are serialized
//! through a single-connection writer pool while reads (execution lookups,
//! listings) fan out over a multi-connection reader pool. Both pools use WAL
//! journal mode and enforce foreign keys.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// File name of the engine database inside the data directory.
pub const DATABASE_FILE: &str = "stepflow.db";

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: up to 8 connections for concurrent SELECT queries.
/// - `writer`: a single connection for serialized INSERT/UPDATE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `database_url` and run
    /// pending migrations on the writer before the reader pool opens.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(base_opts.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

/// SQLite URL for the engine database inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}

/// Database URL for the resolved data directory (`STEPFLOW_DATA_DIR`, or
/// `~/.stepflow`).
pub fn default_database_url() -> String {
    database_url(&crate::config::resolve_data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(name: &str) -> (tempfile::TempDir, DatabasePool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join(name).display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let (_dir, pool) = open("test.db").await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, vec!["workflow_definitions", "workflow_executions"]);
    }

    #[tokio::test]
    async fn test_pool_wal_mode() {
        let (_dir, pool) = open("test_wal.db").await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_pool_foreign_keys_enforced() {
        let (_dir, pool) = open("test_fk.db").await;

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool.writer)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(dir.path());
        drop(DatabasePool::new(&url).await.unwrap());
        DatabasePool::new(&url).await.unwrap();
    }

    #[test]
    fn test_database_url() {
        let url = database_url(Path::new("/var/lib/stepflow"));
        assert_eq!(url, "sqlite:///var/lib/stepflow/stepflow.db?mode=rwc");
        assert!(default_database_url().starts_with("sqlite://"));
    }
}
