//! Remote store port (driven/secondary port)
//!
//! This module defines the interface of the remote file store: a flat,
//! ID-keyed collection of files whose names encode `/`-delimited paths.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because transport errors are adapter-specific.
//!   A response with `ok == false` is a rejection by the store, not a
//!   transport failure.
//! - `meta`, when present in a response, is a full authoritative snapshot.
//!   Callers rebuild from it instead of patching.
//! - Checksums are reported with [`Checksum::of`](crate::domain::Checksum::of).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Checksum, Content, FileId, FilePath, RemoteFileMeta, RemoteSnapshot};

// ============================================================================
// DTOs
// ============================================================================

/// A file as returned by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: FileId,
    #[serde(flatten)]
    pub meta: RemoteFileMeta,
}

/// Response of a listing call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTreeResponse {
    pub items: Vec<RemoteFile>,
    pub meta: Option<RemoteSnapshot>,
}

/// A mutation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Mutation {
    Create {
        path: FilePath,
        content: Content,
        mime_type: String,
    },
    Update {
        id: FileId,
        content: Content,
    },
    Rename {
        id: FileId,
        new_path: FilePath,
    },
    Move {
        id: FileId,
        new_path: FilePath,
    },
    Delete {
        id: FileId,
    },
    Encrypt {
        id: FileId,
        ciphertext: String,
    },
    Decrypt {
        id: FileId,
        plaintext: String,
    },
    Publish {
        id: FileId,
    },
    Unpublish {
        id: FileId,
    },
}

impl Mutation {
    /// Action name used in logs
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Update { .. } => "update",
            Mutation::Rename { .. } => "rename",
            Mutation::Move { .. } => "move",
            Mutation::Delete { .. } => "delete",
            Mutation::Encrypt { .. } => "encrypt",
            Mutation::Decrypt { .. } => "decrypt",
            Mutation::Publish { .. } => "publish",
            Mutation::Unpublish { .. } => "unpublish",
        }
    }

    /// Target file, `None` for creations
    #[must_use]
    pub fn target(&self) -> Option<&FileId> {
        match self {
            Mutation::Create { .. } => None,
            Mutation::Update { id, .. }
            | Mutation::Rename { id, .. }
            | Mutation::Move { id, .. }
            | Mutation::Delete { id }
            | Mutation::Encrypt { id, .. }
            | Mutation::Decrypt { id, .. }
            | Mutation::Publish { id }
            | Mutation::Unpublish { id } => Some(id),
        }
    }
}

/// Response of a mutation call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationResponse {
    pub ok: bool,
    pub file: Option<RemoteFile>,
    pub meta: Option<RemoteSnapshot>,
    pub error: Option<String>,
}

impl MutationResponse {
    /// Successful response carrying the affected file
    #[must_use]
    pub fn success(file: Option<RemoteFile>, meta: Option<RemoteSnapshot>) -> Self {
        Self {
            ok: true,
            file,
            meta,
            error: None,
        }
    }

    /// Rejected response
    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            file: None,
            meta: None,
            error: Some(error.into()),
        }
    }
}

/// File content fetched from the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteContent {
    pub content: Content,
    pub checksum: Option<Checksum>,
    pub modified_time: Option<DateTime<Utc>>,
}

/// A revision kept by the remote store's own history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRevision {
    pub id: String,
    pub modified_time: DateTime<Utc>,
    pub content: String,
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for the remote file store
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists the files below a root folder
    ///
    /// # Arguments
    /// * `folder_id` - Root folder of the replica
    /// * `refresh` - Bypass any server-side listing cache
    async fn list_tree(&self, folder_id: &str, refresh: bool) -> anyhow::Result<ListTreeResponse>;

    /// Applies a mutation
    async fn mutate(&self, mutation: Mutation) -> anyhow::Result<MutationResponse>;

    /// Downloads the current content of a file
    async fn fetch_content(&self, id: &FileId) -> anyhow::Result<RemoteContent>;

    /// Lists the revisions the store keeps for a file, oldest first
    async fn list_revisions(&self, id: &FileId) -> anyhow::Result<Vec<RemoteRevision>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_target() {
        let id = FileId::new("f1".to_string()).unwrap();
        let rename = Mutation::Rename {
            id: id.clone(),
            new_path: FilePath::new("b.md".to_string()).unwrap(),
        };
        assert_eq!(rename.action(), "rename");
        assert_eq!(rename.target(), Some(&id));

        let create = Mutation::Create {
            path: FilePath::new("a.md".to_string()).unwrap(),
            content: Content::from("x"),
            mime_type: "text/markdown".to_string(),
        };
        assert!(create.target().is_none());
    }

    #[test]
    fn test_rejected_response() {
        let resp = MutationResponse::rejected("quota exceeded");
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("quota exceeded"));
    }
}
