//! Mirrorleaf Cache - Local state persistence
//!
//! SQLite-based storage for:
//! - Cached file content (one row per file identifier)
//! - The last authoritative remote snapshot (a single record)
//! - Local and remote edit history
//!
//! ## Architecture
//!
//! This crate implements the `IContentStore`, `ISyncMetaStore` and
//! `IHistoryStore` ports from `mirrorleaf-core` using SQLite as the storage
//! backend. It is a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteContentStore`], [`SqliteSyncMetaStore`], [`SqliteHistoryStore`] - Port implementations
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use mirrorleaf_cache::{DatabasePool, SqliteContentStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/mirrorleaf/cache.db")).await?;
//! let store = SqliteContentStore::new(pool.pool().clone());
//! // Use store as IContentStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::{SqliteContentStore, SqliteHistoryStore, SqliteSyncMetaStore};

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

impl From<mirrorleaf_core::domain::DomainError> for CacheError {
    fn from(e: mirrorleaf_core::domain::DomainError) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
