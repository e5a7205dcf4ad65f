//! Error types for the edit history tracker

use thiserror::Error;

use mirrorleaf_core::domain::{DomainError, Identifier};

/// Errors that can occur while recording or restoring history
#[derive(Debug, Error)]
pub enum HistoryError {
    /// No history has been recorded for the file
    #[error("no history for {0}")]
    NotFound(Identifier),

    /// Restore index past the end of the history
    #[error("history index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The requested entry holds an empty diff and cannot be restored
    #[error("history entry {0} has no changes to restore")]
    EmptyEntry(usize),

    /// A stored diff no longer applies to its baseline
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
