//! Database connection pool management
//!
//! Wraps SQLx's `SqlitePool`:
//! - parent directories of the database file are created on demand
//! - WAL journal mode so readers don't block the single writer
//! - the embedded schema is applied on every open (idempotent)
//! - an in-memory mode for tests

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use mirrorleaf_core::config::CacheConfig;

use crate::CacheError;

const MAX_FILE_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pool of SQLite connections backing the local stores
///
/// File databases get up to five connections and a five-second busy
/// timeout. In-memory databases are limited to one connection since each
/// SQLite in-memory connection is its own database.
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the database file at `db_path`
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the directory or connection
    /// cannot be created, `CacheError::MigrationFailed` if the schema fails
    /// to apply.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_FILE_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to open database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::apply_schema(&pool).await?;

        tracing::info!(path = %db_path.display(), "Cache database opened");

        Ok(Self { pool })
    }

    /// Opens the database named by the cache configuration
    ///
    /// # Errors
    ///
    /// Same as [`DatabasePool::new`].
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::new(&config.database).await
    }

    /// Creates an in-memory database for tests
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` or `CacheError::MigrationFailed`.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {}", e))
            })?;

        Self::apply_schema(&pool).await?;

        tracing::debug!("In-memory cache database created");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every connection of the pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_schema(pool: &SqlitePool) -> Result<(), CacheError> {
        let schema = include_str!("migrations/20261016_initial.sql");
        sqlx::raw_sql(schema).execute(pool).await.map_err(|e| {
            CacheError::MigrationFailed(format!("Failed to apply initial schema: {}", e))
        })?;

        tracing::debug!("Cache schema applied");
        Ok(())
    }
}
