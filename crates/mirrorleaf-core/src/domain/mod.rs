//! Domain entities and business logic
//!
//! This module contains the core domain types for Mirrorleaf:
//! - Newtypes for identifiers and validated paths
//! - Cached content, checksums and the normalization rule
//! - The last-known remote snapshot
//! - The derived folder tree
//! - Edit history records
//! - Domain-specific error types

pub mod cache_entry;
pub mod errors;
pub mod history;
pub mod newtypes;
pub mod sync_meta;
pub mod tree;

// Re-export commonly used types
pub use cache_entry::{normalize_text, CacheEntry, Checksum, Content, Encoding};
pub use errors::DomainError;
pub use history::{DiffOp, DiffStats, EditHistoryEntry, FileHistory, LineDiff, Origin};
pub use newtypes::*;
pub use sync_meta::{RemoteFileMeta, RemoteSnapshot, SyncMetaEntry, SyncSnapshot};
pub use tree::{build_tree, files_under, FileMeta, TreeNode};
