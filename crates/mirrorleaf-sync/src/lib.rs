//! Mirrorleaf Sync - Tree and cache synchronization engine
//!
//! Provides:
//! - Optimistic local mutations reconciled with authoritative remote snapshots
//! - Temporary identifiers for files whose creation is not yet confirmed
//! - Busy tracking of in-flight remote operations
//! - Checksum-based local modification detection
//!
//! ## Modules
//!
//! - [`orchestrator`] - [`TreeSyncOrchestrator`], the surface used by the UI
//! - [`temp_ids`] - Creation lifecycle and temp → real migration
//! - [`coordinator`] - Counted busy set with RAII guards
//! - [`detector`] - Modification detection with per-scan memoization
//! - [`events`] - Typed observers
//! - [`locks`] - Per-entity content locks
//! - [`retry`] - Exponential backoff for transient remote failures

pub mod coordinator;
pub mod detector;
pub mod events;
pub mod locks;
pub mod orchestrator;
pub mod retry;
pub mod temp_ids;

use thiserror::Error;

use mirrorleaf_core::domain::{DomainError, Identifier};
use mirrorleaf_core::ports::CipherError;
use mirrorleaf_history::HistoryError;

pub use coordinator::{MutationCoordinator, MutationGuard};
pub use detector::ModificationDetector;
pub use events::{SubscriptionId, SyncEvent};
pub use orchestrator::{BatchPlan, BatchReport, Ports, TreeSyncOrchestrator};
pub use temp_ids::{CreationState, MigrationOutcome, TempIdManager};

/// Errors surfaced by synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote call failed (after retries for transient failures)
    #[error("remote call failed: {0:#}")]
    Remote(anyhow::Error),

    /// The remote store answered but refused the mutation
    #[error("remote store rejected {action}: {reason}")]
    Rejected { action: String, reason: String },

    /// No file or folder with this identifier
    #[error("not found: {0}")]
    NotFound(Identifier),

    /// The operation needs a confirmed remote file
    #[error("{0} is still pending creation")]
    PendingCreation(Identifier),

    /// Encryption primitive failure; nothing was changed
    #[error("encryption failed: {0}")]
    Encryption(#[from] CipherError),

    /// The operation does not apply to this target
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// A domain-level error propagated from mirrorleaf-core
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Local persistence failure on a path that cannot degrade
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    /// Edit history failure
    #[error("history error: {0}")]
    History(#[from] HistoryError),
}
