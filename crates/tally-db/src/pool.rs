//! # Database Handle
//!
//! Opens the device's SQLite file and applies the embedded schema.
//!
//! ```text
//! AppContext::build
//!      │
//!      ▼
//! Database::new(DbConfig::new(path))
//!      │  create parent dir, open file (WAL, NORMAL sync)
//!      │  apply migrations/sqlite/*
//!      ▼
//! db.local_storage() ──► KvRepository (offline queue, snapshots)
//! ```
//!
//! A committed write survives an app kill: WAL keeps the last transaction
//! on disk before `set` returns.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::repository::kv::KvRepository;

/// Schema for `local_kv`, embedded at compile time.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

const IN_MEMORY: &str = ":memory:";

/// Where the local database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub database_path: PathBuf,
}

impl DbConfig {
    /// File-backed database. The file and its directory are created on
    /// first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
        }
    }

    /// Private in-memory database, gone when the handle is closed.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path == Path::new(IN_MEMORY)
    }
}

/// Open local database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening local database");

        let options = if config.is_in_memory() {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            if let Some(dir) = config.database_path.parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir).map_err(|e| {
                        DbError::ConnectionFailed(format!("{}: {}", dir.display(), e))
                    })?;
                }
            }
            SqliteConnectOptions::new()
                .filename(&config.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
        };

        // an in-memory database exists per connection, so it gets exactly one
        let max_connections = if config.is_in_memory() { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        MIGRATOR.run(&pool).await?;
        debug!(migrations = MIGRATOR.migrations.len(), "Local schema up to date");

        Ok(Database { pool })
    }

    /// The `local_kv` store backed by this database.
    pub fn local_storage(&self) -> KvRepository {
        KvRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        info!("Closing local database");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValueStore;

    #[tokio::test]
    async fn test_local_storage_shares_pool() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.local_storage().set("k", "v").await.unwrap();

        let value = db.local_storage().get("k").await.unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_schema_reapplies_cleanly() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        MIGRATOR.run(&db.pool).await.unwrap();
        assert_eq!(db.local_storage().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_database_rejects_writes() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let storage = db.local_storage();
        db.close().await;

        assert!(storage.set("k", "v").await.is_err());
    }

    #[test]
    fn test_in_memory_config() {
        assert!(DbConfig::in_memory().is_in_memory());
        assert!(!DbConfig::new("/data/tally.db").is_in_memory());
    }
}
