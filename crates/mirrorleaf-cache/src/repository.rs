//! SQLite implementations of the local persistence ports
//!
//! ## Type Mapping
//!
//! | Domain Type         | SQL Type | Strategy                                   |
//! |---------------------|----------|--------------------------------------------|
//! | Identifier          | TEXT     | textual form (`id`, `vfolder:p`, `new:p`)  |
//! | FilePath, Checksum  | TEXT     | `.as_str()` / validated constructor        |
//! | Content             | TEXT     | `(content, encoding)` via `Content::to_stored` |
//! | DateTime<Utc>       | TEXT     | RFC 3339 via `to_rfc3339()`                |
//! | snapshot files map  | TEXT     | serde_json object                          |
//! | history entries     | TEXT     | serde_json array                           |
//!
//! Every write is a single `INSERT OR REPLACE` (or a transaction for
//! read-modify-write), so readers never see a half-written record.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mirrorleaf_core::domain::{
    CacheEntry, Checksum, Content, EditHistoryEntry, Encoding, FileHistory, FileId, FilePath,
    Identifier, Origin, RemoteFileMeta, SyncSnapshot,
};
use mirrorleaf_core::ports::{IContentStore, IHistoryStore, ISyncMetaStore};

use crate::CacheError;

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Parse a DateTime<Utc> from an RFC 3339 string
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            CacheError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, CacheError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}

fn parse_identifier(s: &str) -> Result<Identifier, CacheError> {
    Identifier::from_str(s).map_err(CacheError::from)
}

fn cache_entry_from_row(row: &SqliteRow) -> Result<CacheEntry, CacheError> {
    let file_id: String = row.get("file_id");
    let path: String = row.get("path");
    let data: String = row.get("content");
    let encoding: String = row.get("encoding");
    let checksum: String = row.get("checksum");
    let baseline: Option<String> = row.get("baseline_checksum");
    let modified_time: Option<String> = row.get("modified_time");
    let cached_at: String = row.get("cached_at");

    let encoding = Encoding::from_str(&encoding)?;

    Ok(CacheEntry {
        file_id: parse_identifier(&file_id)?,
        path: FilePath::new(path)?,
        content: Content::from_stored(data, encoding)?,
        checksum: Checksum::new(checksum)?,
        baseline_checksum: baseline.map(Checksum::new).transpose()?,
        modified_time: parse_optional_datetime(modified_time)?,
        cached_at: parse_datetime(&cached_at)?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<SyncSnapshot, CacheError> {
    let root_folder_id: String = row.get("root_folder_id");
    let last_updated_at: String = row.get("last_updated_at");
    let files: String = row.get("files");

    Ok(SyncSnapshot {
        root_folder_id,
        last_updated_at: parse_datetime(&last_updated_at)?,
        files: serde_json::from_str(&files)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<FileHistory, CacheError> {
    let file_id: String = row.get("file_id");
    let origin: String = row.get("origin");
    let baseline: String = row.get("baseline");
    let entries: String = row.get("entries");

    let entries: Vec<EditHistoryEntry> = serde_json::from_str(&entries)?;

    Ok(FileHistory {
        file_id: parse_identifier(&file_id)?,
        origin: Origin::from_str(&origin)?,
        baseline,
        entries,
    })
}

// ============================================================================
// SqliteContentStore
// ============================================================================

/// SQLite-backed cache of file content
pub struct SqliteContentStore {
    pool: SqlitePool,
}

impl SqliteContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IContentStore for SqliteContentStore {
    async fn get(&self, id: &Identifier) -> anyhow::Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE file_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(cache_entry_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        let id = entry.file_id.to_string();
        let (data, encoding) = entry.content.to_stored();

        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries \
             (file_id, path, content, encoding, checksum, baseline_checksum, \
              modified_time, cached_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(entry.path.as_str())
        .bind(&data)
        .bind(encoding.as_str())
        .bind(entry.checksum.as_str())
        .bind(entry.baseline_checksum.as_ref().map(Checksum::as_str))
        .bind(entry.modified_time.map(|dt| dt.to_rfc3339()))
        .bind(entry.cached_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(file_id = %id, "Saved cache entry");
        Ok(())
    }

    async fn delete(&self, id: &Identifier) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE file_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        tracing::trace!(file_id = %id, "Deleted cache entry");
        Ok(result.rows_affected() > 0)
    }

    async fn list_all_ids(&self) -> anyhow::Result<BTreeSet<Identifier>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT file_id FROM cache_entries")
            .fetch_all(&self.pool)
            .await?;

        let mut out = BTreeSet::new();
        for id in ids {
            out.insert(parse_identifier(&id)?);
        }
        Ok(out)
    }

    async fn rename(&self, id: &Identifier, new_path: &FilePath) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE cache_entries SET path = ? WHERE file_id = ?")
            .bind(new_path.as_str())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        tracing::trace!(file_id = %id, path = %new_path, "Renamed cache entry");
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;
        tracing::debug!(removed = result.rows_affected(), "Cleared cache entries");
        Ok(result.rows_affected())
    }
}

// ============================================================================
// SqliteSyncMetaStore
// ============================================================================

/// SQLite-backed single-record snapshot store
pub struct SqliteSyncMetaStore {
    pool: SqlitePool,
}

impl SqliteSyncMetaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write_snapshot<'e, E>(executor: E, snapshot: &SyncSnapshot) -> Result<(), CacheError>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let files = serde_json::to_string(&snapshot.files)?;
        sqlx::query(
            "INSERT OR REPLACE INTO sync_meta (id, root_folder_id, last_updated_at, files) \
             VALUES (1, ?, ?, ?)",
        )
        .bind(&snapshot.root_folder_id)
        .bind(snapshot.last_updated_at.to_rfc3339())
        .bind(&files)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ISyncMetaStore for SqliteSyncMetaStore {
    async fn load(&self, root_folder_id: &str) -> anyhow::Result<Option<SyncSnapshot>> {
        let row = sqlx::query("SELECT * FROM sync_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let snapshot = snapshot_from_row(&row)?;
        if snapshot.root_folder_id != root_folder_id {
            tracing::info!(
                stored_root = %snapshot.root_folder_id,
                root = %root_folder_id,
                "Root folder changed, discarding stored snapshot"
            );
            self.clear().await?;
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &SyncSnapshot) -> anyhow::Result<()> {
        Self::write_snapshot(&self.pool, snapshot).await?;
        tracing::trace!(files = snapshot.files.len(), "Saved sync snapshot");
        Ok(())
    }

    async fn upsert_entry(
        &self,
        root_folder_id: &str,
        id: &FileId,
        meta: &RemoteFileMeta,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM sync_meta WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await?;

        let mut snapshot = match row {
            Some(ref r) => {
                let stored = snapshot_from_row(r)?;
                if stored.root_folder_id == root_folder_id {
                    stored
                } else {
                    SyncSnapshot::empty(root_folder_id)
                }
            }
            None => SyncSnapshot::empty(root_folder_id),
        };
        snapshot.upsert(id.clone(), meta.clone());

        Self::write_snapshot(&mut *tx, &snapshot).await?;
        tx.commit().await?;

        tracing::trace!(file_id = %id, "Upserted sync meta entry");
        Ok(())
    }

    async fn remove_entry(&self, root_folder_id: &str, id: &FileId) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM sync_meta WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(ref r) = row {
            let mut snapshot = snapshot_from_row(r)?;
            if snapshot.root_folder_id == root_folder_id && snapshot.remove(id).is_some() {
                Self::write_snapshot(&mut *tx, &snapshot).await?;
            }
        }
        tx.commit().await?;

        tracing::trace!(file_id = %id, "Removed sync meta entry");
        Ok(())
    }

    async fn get_entry(
        &self,
        root_folder_id: &str,
        id: &FileId,
    ) -> anyhow::Result<Option<RemoteFileMeta>> {
        let row = sqlx::query("SELECT * FROM sync_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => {
                let snapshot = snapshot_from_row(r)?;
                if snapshot.root_folder_id != root_folder_id {
                    return Ok(None);
                }
                Ok(snapshot.files.get(id).cloned())
            }
            None => Ok(None),
        }
    }

    async fn clear(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_meta")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================================
// SqliteHistoryStore
// ============================================================================

/// SQLite-backed edit history, one row per (file, origin)
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IHistoryStore for SqliteHistoryStore {
    async fn load(&self, id: &Identifier, origin: Origin) -> anyhow::Result<Option<FileHistory>> {
        let row = sqlx::query("SELECT * FROM edit_history WHERE file_id = ? AND origin = ?")
            .bind(id.to_string())
            .bind(origin.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(history_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, history: &FileHistory) -> anyhow::Result<()> {
        let id = history.file_id.to_string();
        let entries = serde_json::to_string(&history.entries)
            .map_err(|e| anyhow::anyhow!("Failed to serialize history entries: {}", e))?;

        sqlx::query(
            "INSERT OR REPLACE INTO edit_history \
             (file_id, origin, baseline, entries, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(history.origin.as_str())
        .bind(&history.baseline)
        .bind(&entries)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::trace!(
            file_id = %id,
            origin = %history.origin,
            entries = history.entries.len(),
            "Saved edit history"
        );
        Ok(())
    }

    async fn delete(&self, id: &Identifier) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM edit_history WHERE file_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rename_key(&self, from: &Identifier, to: &Identifier) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM edit_history WHERE file_id = ?")
            .bind(to.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE edit_history SET file_id = ?, updated_at = ? WHERE file_id = ?")
            .bind(to.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::trace!(from = %from, to = %to, "Moved edit history key");
        Ok(())
    }

    async fn list_ids(&self) -> anyhow::Result<BTreeSet<Identifier>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT file_id FROM edit_history")
            .fetch_all(&self.pool)
            .await?;

        let mut out = BTreeSet::new();
        for id in ids {
            out.insert(parse_identifier(&id)?);
        }
        Ok(out)
    }
}
