//! Last-known remote state
//!
//! The remote store answers listing and mutation calls with an authoritative
//! snapshot of every file it holds. [`SyncSnapshot`] is that snapshot bound to
//! the root folder it was taken from; it is persisted as a single record and
//! discarded when the configured root changes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache_entry::Checksum;
use super::newtypes::{FileId, FilePath};
use super::tree::FileMeta;

/// Remote metadata of one file as reported by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMeta {
    pub name: FilePath,
    pub mime_type: String,
    pub modified_time: Option<DateTime<Utc>>,
    pub checksum: Option<Checksum>,
    #[serde(default)]
    pub shared: bool,
}

impl RemoteFileMeta {
    /// Tree-facing subset of the metadata
    #[must_use]
    pub fn to_file_meta(&self) -> FileMeta {
        FileMeta {
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            modified_time: self.modified_time,
        }
    }
}

/// Authoritative snapshot returned by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub last_updated_at: Option<DateTime<Utc>>,
    pub files: BTreeMap<FileId, RemoteFileMeta>,
}

/// Last-known remote state of a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetaEntry {
    pub file_id: FileId,
    pub checksum: Option<Checksum>,
    pub modified_time: Option<DateTime<Utc>>,
}

impl SyncMetaEntry {
    #[must_use]
    pub fn from_remote(file_id: FileId, meta: &RemoteFileMeta) -> Self {
        Self {
            file_id,
            checksum: meta.checksum.clone(),
            modified_time: meta.modified_time,
        }
    }
}

/// Persisted snapshot bound to a root folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub root_folder_id: String,
    pub last_updated_at: DateTime<Utc>,
    pub files: BTreeMap<FileId, RemoteFileMeta>,
}

impl SyncSnapshot {
    /// Empty snapshot for a root
    #[must_use]
    pub fn empty(root_folder_id: impl Into<String>) -> Self {
        Self {
            root_folder_id: root_folder_id.into(),
            last_updated_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    /// Bind a remote snapshot to a root
    #[must_use]
    pub fn from_remote(root_folder_id: impl Into<String>, remote: RemoteSnapshot) -> Self {
        Self {
            root_folder_id: root_folder_id.into(),
            last_updated_at: remote.last_updated_at.unwrap_or_else(Utc::now),
            files: remote.files,
        }
    }

    #[must_use]
    pub fn entry(&self, id: &FileId) -> Option<SyncMetaEntry> {
        self.files
            .get(id)
            .map(|meta| SyncMetaEntry::from_remote(id.clone(), meta))
    }

    pub fn upsert(&mut self, id: FileId, meta: RemoteFileMeta) {
        self.files.insert(id, meta);
        self.last_updated_at = Utc::now();
    }

    pub fn remove(&mut self, id: &FileId) -> Option<RemoteFileMeta> {
        let removed = self.files.remove(id);
        if removed.is_some() {
            self.last_updated_at = Utc::now();
        }
        removed
    }
}
