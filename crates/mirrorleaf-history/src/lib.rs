//! Mirrorleaf History - Local edit history
//!
//! Provides:
//! - Line diffs that reproduce content byte for byte
//! - Debounced snapshot commits
//! - Per-file local history with retention, and imported remote revisions
//! - Restore to any recorded state and a merged local/remote timeline

pub mod debounce;
pub mod diff;
pub mod error;
pub mod tracker;

pub use debounce::CommitDebouncer;
pub use error::HistoryError;
pub use tracker::{EditHistoryTracker, TimelineEntry};
