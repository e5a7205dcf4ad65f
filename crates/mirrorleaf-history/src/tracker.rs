//! Edit history tracker
//!
//! Records line-diff snapshots of file content on commit boundaries and
//! reconstructs any recorded state exactly. Local history comes from the
//! user's own edits; remote history is imported from the store's revision
//! list. The two are stored under separate keys and merged only by
//! [`EditHistoryTracker::timeline`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use mirrorleaf_core::config::HistoryConfig;
use mirrorleaf_core::domain::{EditHistoryEntry, FileHistory, Identifier, Origin};
use mirrorleaf_core::ports::{IHistoryStore, RemoteRevision};

use crate::debounce::CommitDebouncer;
use crate::diff;
use crate::error::HistoryError;

/// One row of the merged local/remote timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub origin: Origin,
    /// Index within the history of `origin`
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub additions: usize,
    pub deletions: usize,
    pub restorable: bool,
    pub revision_id: Option<String>,
}

/// Records and restores per-file edit history
pub struct EditHistoryTracker {
    store: Arc<dyn IHistoryStore>,
    debouncer: Mutex<CommitDebouncer>,
    locks: DashMap<Identifier, Arc<tokio::sync::Mutex<()>>>,
    max_entries: usize,
}

impl EditHistoryTracker {
    /// Creates a tracker
    ///
    /// # Arguments
    /// * `store` - Persistence for histories
    /// * `debounce` - Quiet period before a noted edit is committed
    /// * `max_entries` - Local entries kept per file
    pub fn new(store: Arc<dyn IHistoryStore>, debounce: Duration, max_entries: usize) -> Self {
        Self {
            store,
            debouncer: Mutex::new(CommitDebouncer::new(debounce)),
            locks: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn IHistoryStore>, config: &HistoryConfig) -> Self {
        Self::new(store, config.debounce(), config.max_entries_per_file)
    }

    fn debouncer(&self) -> std::sync::MutexGuard<'_, CommitDebouncer> {
        self.debouncer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, id: &Identifier) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Notes the latest content of a file; committed after the debounce delay
    pub fn note_edit(&self, id: &Identifier, content: &str) {
        self.debouncer().push(id.clone(), content.to_string());
    }

    /// True when an edit is waiting for its debounce delay
    pub fn has_pending(&self, id: &Identifier) -> bool {
        self.debouncer().contains(id)
    }

    /// Sets the baseline of a file that has no local history yet
    pub async fn seed(&self, id: &Identifier, content: &str) -> Result<(), HistoryError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if self.store.load(id, Origin::Local).await?.is_none() {
            let history = FileHistory::new(id.clone(), Origin::Local, content);
            self.store.save(&history).await?;
            debug!(file_id = %id, "Seeded history baseline");
        }
        Ok(())
    }

    /// Appends a snapshot if `content` differs from the current tip
    ///
    /// Supersedes any pending debounced snapshot of the same file.
    pub async fn record_snapshot(
        &self,
        id: &Identifier,
        content: &str,
    ) -> Result<Option<EditHistoryEntry>, HistoryError> {
        self.debouncer().take(id);
        self.append(id, content).await
    }

    async fn append(
        &self,
        id: &Identifier,
        content: &str,
    ) -> Result<Option<EditHistoryEntry>, HistoryError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut history = self
            .store
            .load(id, Origin::Local)
            .await?
            .unwrap_or_else(|| FileHistory::new(id.clone(), Origin::Local, ""));

        let tip = diff::apply_all(&history.baseline, history.entries.iter().map(|e| &e.diff))?;
        let line_diff = diff::compute(&tip, content);
        if line_diff.is_empty() {
            return Ok(None);
        }

        let entry = EditHistoryEntry {
            timestamp: Utc::now(),
            stats: line_diff.stats(),
            diff: line_diff,
            origin: Origin::Local,
            revision_id: None,
        };
        history.entries.push(entry.clone());
        self.fold_excess(&mut history)?;

        self.store.save(&history).await?;
        debug!(
            file_id = %id,
            additions = entry.stats.additions,
            deletions = entry.stats.deletions,
            "Recorded history snapshot"
        );
        Ok(Some(entry))
    }

    /// Folds the oldest entries into the baseline until the cap holds
    fn fold_excess(&self, history: &mut FileHistory) -> Result<(), HistoryError> {
        while history.entries.len() > self.max_entries {
            let oldest = history.entries.remove(0);
            history.baseline = diff::apply(&history.baseline, &oldest.diff)?;
        }
        Ok(())
    }

    /// Commits the pending snapshot of a file now
    pub async fn commit(&self, id: &Identifier) -> Result<Option<EditHistoryEntry>, HistoryError> {
        let pending = self.debouncer().take(id);
        match pending {
            Some(content) => self.append(id, &content).await,
            None => Ok(None),
        }
    }

    /// Commits every snapshot whose debounce delay has elapsed
    ///
    /// Returns the number of entries appended.
    pub async fn flush_due(&self) -> Result<usize, HistoryError> {
        let settled = self.debouncer().poll();
        self.commit_all(settled).await
    }

    /// Commits every pending snapshot regardless of age
    pub async fn flush_all(&self) -> Result<usize, HistoryError> {
        let pending = self.debouncer().drain();
        self.commit_all(pending).await
    }

    async fn commit_all(&self, snapshots: Vec<(Identifier, String)>) -> Result<usize, HistoryError> {
        let mut appended = 0;
        for (id, content) in snapshots {
            if self.append(&id, &content).await?.is_some() {
                appended += 1;
            }
        }
        Ok(appended)
    }

    // ========================================================================
    // Identity changes
    // ========================================================================

    /// Carries the history of `from` over to `to`
    ///
    /// A pending snapshot of `from` is committed first so no edit is lost.
    pub async fn migrate(&self, from: &Identifier, to: &Identifier) -> Result<(), HistoryError> {
        self.commit(from).await?;

        {
            let from_lock = self.lock_for(from);
            let _from_guard = from_lock.lock().await;
            let to_lock = self.lock_for(to);
            let _to_guard = to_lock.lock().await;
            self.store.rename_key(from, to).await?;
        }
        self.locks.remove(from);

        info!(from = %from, to = %to, "Migrated edit history");
        Ok(())
    }

    /// Drops all history of a file, pending snapshot included
    pub async fn discard(&self, id: &Identifier) -> Result<(), HistoryError> {
        self.debouncer().take(id);
        {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;
            self.store.delete(id).await?;
        }
        self.locks.remove(id);
        Ok(())
    }

    /// Drops the lock slot of a file nobody is recording right now
    pub fn release(&self, id: &Identifier) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    // ========================================================================
    // Remote revisions
    // ========================================================================

    /// Records a version of a file read from the remote store
    ///
    /// The first version seen becomes the remote baseline. Later versions
    /// are appended to the remote history when they differ from its tip;
    /// local history is left alone.
    pub async fn observe_remote(
        &self,
        id: &Identifier,
        content: &str,
        modified_time: Option<DateTime<Utc>>,
    ) -> Result<Option<EditHistoryEntry>, HistoryError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let Some(mut history) = self.store.load(id, Origin::Remote).await? else {
            let history = FileHistory::new(id.clone(), Origin::Remote, content);
            self.store.save(&history).await?;
            debug!(file_id = %id, "Seeded remote history baseline");
            return Ok(None);
        };

        let tip = diff::apply_all(&history.baseline, history.entries.iter().map(|e| &e.diff))?;
        let line_diff = diff::compute(&tip, content);
        if line_diff.is_empty() {
            return Ok(None);
        }

        let entry = EditHistoryEntry {
            timestamp: modified_time.unwrap_or_else(Utc::now),
            stats: line_diff.stats(),
            diff: line_diff,
            origin: Origin::Remote,
            revision_id: None,
        };
        history.entries.push(entry.clone());
        self.fold_excess(&mut history)?;
        self.store.save(&history).await?;

        debug!(file_id = %id, "Recorded fetched remote version");
        Ok(Some(entry))
    }

    /// Replaces the remote history of a file with the given revisions
    ///
    /// Revisions are expected oldest first. Revisions identical to their
    /// predecessor are kept as empty entries. Returns the entry count.
    pub async fn import_remote(
        &self,
        id: &Identifier,
        revisions: &[RemoteRevision],
    ) -> Result<usize, HistoryError> {
        let mut history = FileHistory::new(id.clone(), Origin::Remote, "");
        let mut previous = String::new();

        for revision in revisions {
            let line_diff = diff::compute(&previous, &revision.content);
            history.entries.push(EditHistoryEntry {
                timestamp: revision.modified_time,
                stats: line_diff.stats(),
                diff: line_diff,
                origin: Origin::Remote,
                revision_id: Some(revision.id.clone()),
            });
            previous.clone_from(&revision.content);
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.store.save(&history).await?;

        info!(file_id = %id, revisions = history.entries.len(), "Imported remote history");
        Ok(history.entries.len())
    }

    // ========================================================================
    // Queries and restore
    // ========================================================================

    pub async fn history(
        &self,
        id: &Identifier,
        origin: Origin,
    ) -> Result<Option<FileHistory>, HistoryError> {
        Ok(self.store.load(id, origin).await?)
    }

    /// Content of the file after local entry `index`
    pub async fn restore_to(&self, id: &Identifier, index: usize) -> Result<String, HistoryError> {
        self.restore(id, Origin::Local, index).await
    }

    /// Content of the file after remote revision entry `index`
    pub async fn restore_remote_to(
        &self,
        id: &Identifier,
        index: usize,
    ) -> Result<String, HistoryError> {
        self.restore(id, Origin::Remote, index).await
    }

    async fn restore(
        &self,
        id: &Identifier,
        origin: Origin,
        index: usize,
    ) -> Result<String, HistoryError> {
        let history = self
            .store
            .load(id, origin)
            .await?
            .ok_or_else(|| HistoryError::NotFound(id.clone()))?;

        let len = history.entries.len();
        let entry = history
            .entries
            .get(index)
            .ok_or(HistoryError::IndexOutOfRange { index, len })?;
        if entry.diff.is_empty() {
            return Err(HistoryError::EmptyEntry(index));
        }

        let content = diff::apply_all(
            &history.baseline,
            history.entries[..=index].iter().map(|e| &e.diff),
        )?;
        Ok(content)
    }

    /// Restorable entry indices of one origin
    pub async fn restore_candidates(
        &self,
        id: &Identifier,
        origin: Origin,
    ) -> Result<Vec<usize>, HistoryError> {
        Ok(self
            .store
            .load(id, origin)
            .await?
            .map(|h| h.restore_candidates())
            .unwrap_or_default())
    }

    /// Local and remote entries merged by timestamp
    pub async fn timeline(&self, id: &Identifier) -> Result<Vec<TimelineEntry>, HistoryError> {
        let mut rows = Vec::new();
        for origin in [Origin::Local, Origin::Remote] {
            if let Some(history) = self.store.load(id, origin).await? {
                rows.extend(history.entries.iter().enumerate().map(|(index, e)| {
                    TimelineEntry {
                        origin,
                        index,
                        timestamp: e.timestamp,
                        additions: e.stats.additions,
                        deletions: e.stats.deletions,
                        restorable: !e.diff.is_empty(),
                        revision_id: e.revision_id.clone(),
                    }
                }));
            }
        }
        rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.origin.cmp(&b.origin))
                .then(a.index.cmp(&b.index))
        });
        Ok(rows)
    }
}
