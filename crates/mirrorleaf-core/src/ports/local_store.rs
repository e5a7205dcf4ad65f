//! Local persistence ports (driven/secondary ports)
//!
//! The engine keeps three kinds of local state: cached file content, the
//! last-known remote snapshot and edit history.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, in-memory, ...) and don't need domain-level classification.
//! - Every write replaces a whole record; readers never observe a partially
//!   updated entry.
//! - Callers emit change notifications; stores have no observers.

use std::collections::BTreeSet;

use crate::domain::{
    CacheEntry, FileHistory, FileId, FilePath, Identifier, Origin, RemoteFileMeta, SyncSnapshot,
};

// ============================================================================
// IContentStore
// ============================================================================

/// Key-value store of cached file content
#[async_trait::async_trait]
pub trait IContentStore: Send + Sync {
    async fn get(&self, id: &Identifier) -> anyhow::Result<Option<CacheEntry>>;

    /// Inserts or replaces the entry keyed by `entry.file_id`
    async fn put(&self, entry: &CacheEntry) -> anyhow::Result<()>;

    /// Deletes an entry; returns whether one existed
    async fn delete(&self, id: &Identifier) -> anyhow::Result<bool>;

    async fn list_all_ids(&self) -> anyhow::Result<BTreeSet<Identifier>>;

    /// Rewrites the `path` field only
    ///
    /// Returns `false` if no entry exists for `id`.
    async fn rename(&self, id: &Identifier, new_path: &FilePath) -> anyhow::Result<bool>;

    /// Removes every entry; returns the count removed
    async fn clear(&self) -> anyhow::Result<u64>;
}

// ============================================================================
// ISyncMetaStore
// ============================================================================

/// Single-record store of the last authoritative snapshot
#[async_trait::async_trait]
pub trait ISyncMetaStore: Send + Sync {
    /// Loads the snapshot for a root
    ///
    /// A stored snapshot taken from another root is deleted and `None`
    /// is returned.
    async fn load(&self, root_folder_id: &str) -> anyhow::Result<Option<SyncSnapshot>>;

    /// Replaces the stored snapshot
    async fn save(&self, snapshot: &SyncSnapshot) -> anyhow::Result<()>;

    /// Inserts or replaces the metadata of one file in the stored snapshot
    async fn upsert_entry(
        &self,
        root_folder_id: &str,
        id: &FileId,
        meta: &RemoteFileMeta,
    ) -> anyhow::Result<()>;

    /// Removes one file from the stored snapshot
    async fn remove_entry(&self, root_folder_id: &str, id: &FileId) -> anyhow::Result<()>;

    async fn get_entry(
        &self,
        root_folder_id: &str,
        id: &FileId,
    ) -> anyhow::Result<Option<RemoteFileMeta>>;

    /// Deletes the stored snapshot
    async fn clear(&self) -> anyhow::Result<()>;
}

// ============================================================================
// IHistoryStore
// ============================================================================

/// Edit history keyed by (file id, origin)
#[async_trait::async_trait]
pub trait IHistoryStore: Send + Sync {
    async fn load(&self, id: &Identifier, origin: Origin) -> anyhow::Result<Option<FileHistory>>;

    /// Inserts or replaces the history keyed by `(history.file_id, history.origin)`
    async fn save(&self, history: &FileHistory) -> anyhow::Result<()>;

    /// Deletes both origins of a file
    async fn delete(&self, id: &Identifier) -> anyhow::Result<()>;

    /// Moves every origin of `from` to `to`, replacing anything under `to`
    async fn rename_key(&self, from: &Identifier, to: &Identifier) -> anyhow::Result<()>;

    async fn list_ids(&self) -> anyhow::Result<BTreeSet<Identifier>>;
}
