//! Local modification detection
//!
//! A file is modified when its cached content no longer matches the
//! last-known remote state. Results are memoized until the entry of that id
//! is invalidated or a new scan begins.
//!
//! A check reads two stores across awaits. Every invalidation bumps the
//! epoch of its id and every scan bumps the scan counter; a check only
//! memoizes its result if neither moved while it was reading.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{trace, warn};

use mirrorleaf_core::domain::{CacheEntry, Identifier, SyncMetaEntry};
use mirrorleaf_core::ports::{IContentStore, ISyncMetaStore};

/// Decides whether `entry` differs from the remote state in `meta`
///
/// Temp ids are never reported as modified, they are pending creation
/// instead.
pub fn classify(id: &Identifier, entry: Option<&CacheEntry>, meta: Option<&SyncMetaEntry>) -> bool {
    if !id.is_real() {
        return false;
    }
    let Some(entry) = entry else {
        return false;
    };

    match meta {
        None => !entry.content.is_empty(),
        Some(SyncMetaEntry {
            checksum: Some(remote),
            ..
        }) => entry.checksum != *remote,
        Some(_) => match &entry.baseline_checksum {
            Some(baseline) => entry.checksum != *baseline,
            None => !entry.content.is_empty(),
        },
    }
}

pub struct ModificationDetector {
    content: Arc<dyn IContentStore>,
    meta: Arc<dyn ISyncMetaStore>,
    root_folder_id: String,
    memo: DashMap<Identifier, bool>,
    epochs: DashMap<Identifier, u64>,
    scan: AtomicU64,
}

impl ModificationDetector {
    pub fn new(
        content: Arc<dyn IContentStore>,
        meta: Arc<dyn ISyncMetaStore>,
        root_folder_id: impl Into<String>,
    ) -> Self {
        Self {
            content,
            meta,
            root_folder_id: root_folder_id.into(),
            memo: DashMap::new(),
            epochs: DashMap::new(),
            scan: AtomicU64::new(0),
        }
    }

    fn epoch(&self, id: &Identifier) -> u64 {
        self.epochs.get(id).map(|e| *e).unwrap_or(0)
    }

    /// Store failures are logged and reported as not modified
    pub async fn is_modified(&self, id: &Identifier) -> bool {
        if let Some(known) = self.memo.get(id) {
            return *known;
        }
        let Some(file_id) = id.as_file_id() else {
            return false;
        };
        let scan = self.scan.load(Ordering::SeqCst);
        let epoch = self.epoch(id);

        let entry = match self.content.get(id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file_id = %id, error = %e, "Cache read failed during modification check");
                return false;
            }
        };
        let meta = match self.meta.get_entry(&self.root_folder_id, file_id).await {
            Ok(meta) => meta.map(|m| SyncMetaEntry::from_remote(file_id.clone(), &m)),
            Err(e) => {
                warn!(file_id = %id, error = %e, "Sync meta read failed during modification check");
                return false;
            }
        };

        let modified = classify(id, entry.as_ref(), meta.as_ref());
        trace!(file_id = %id, modified, "Modification check");
        self.remember(id, modified, scan, epoch);
        modified
    }

    /// Memoizes a result unless the id was invalidated since `epoch`
    fn remember(&self, id: &Identifier, modified: bool, scan: u64, epoch: u64) {
        // The epoch slot stays locked until the memo is written, so an
        // invalidation lands either before the compare or after the insert
        let current = self.epochs.entry(id.clone()).or_insert(0);
        if *current != epoch {
            trace!(file_id = %id, "Invalidated during check, result not memoized");
            return;
        }
        self.memo.insert(id.clone(), modified);
        drop(current);

        if self.scan.load(Ordering::SeqCst) != scan {
            self.memo.remove(id);
        }
    }

    /// Forgets the memoized result of one id
    pub fn invalidate(&self, id: &Identifier) {
        let mut epoch = self.epochs.entry(id.clone()).or_insert(0);
        *epoch += 1;
        self.memo.remove(id);
    }

    /// Drops all state kept for an id that no longer exists
    pub fn forget(&self, id: &Identifier) {
        self.epochs.remove(id);
        self.memo.remove(id);
    }

    /// Starts a new scan pass, forgetting every memoized result
    pub fn begin_scan(&self) {
        self.scan.fetch_add(1, Ordering::SeqCst);
        self.memo.clear();
    }
}
