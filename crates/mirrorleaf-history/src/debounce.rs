//! Debounced snapshot commits
//!
//! Every keystroke-level save pushes the latest content for a file. A
//! snapshot is only committed to history once the file has been quiet for
//! the debounce delay, so a burst of edits becomes one history entry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use mirrorleaf_core::domain::Identifier;

/// Pending snapshot contents keyed by file
///
/// Pushing content for a file that already has a pending snapshot replaces
/// the content and restarts its quiet period.
pub struct CommitDebouncer {
    pending: HashMap<Identifier, (String, Instant)>,
    delay: Duration,
}

impl CommitDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            delay,
        }
    }

    /// Records the latest content of a file
    pub fn push(&mut self, id: Identifier, content: String) {
        self.push_at(id, content, Instant::now());
    }

    pub(crate) fn push_at(&mut self, id: Identifier, content: String, at: Instant) {
        debug!(file_id = %id, "Snapshot pending");
        self.pending.insert(id, (content, at));
    }

    /// Removes and returns every snapshot that has been quiet long enough
    pub fn poll(&mut self) -> Vec<(Identifier, String)> {
        self.poll_at(Instant::now())
    }

    pub(crate) fn poll_at(&mut self, now: Instant) -> Vec<(Identifier, String)> {
        let due: Vec<Identifier> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.saturating_duration_since(*at) >= self.delay)
            .map(|(id, _)| id.clone())
            .collect();

        let settled: Vec<(Identifier, String)> = due
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|(content, _)| (id, content)))
            .collect();

        if !settled.is_empty() {
            debug!(count = settled.len(), "Snapshots settled");
        }
        settled
    }

    /// Removes the pending snapshot of one file regardless of its age
    pub fn take(&mut self, id: &Identifier) -> Option<String> {
        self.pending.remove(id).map(|(content, _)| content)
    }

    /// Removes every pending snapshot
    pub fn drain(&mut self) -> Vec<(Identifier, String)> {
        self.pending
            .drain()
            .map(|(id, (content, _))| (id, content))
            .collect()
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
