//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures of identifiers, paths and checksums.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid remote file ID
    #[error("Invalid file ID: {0}")]
    InvalidFileId(String),

    /// Identifier string could not be parsed
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid checksum format
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    /// Stored content could not be decoded with its declared encoding
    #[error("Invalid content encoding: {0}")]
    InvalidEncoding(String),

    /// A diff does not apply to the content it was recorded against
    #[error("Diff does not apply: {0}")]
    DiffMismatch(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },
}
