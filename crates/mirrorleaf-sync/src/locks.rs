//! Per-entity content locks
//!
//! Serializes writes to the cached content of one identifier. A temp id and
//! the real id it migrates to have separate locks; migration holds the temp
//! lock for its whole duration.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use mirrorleaf_core::domain::Identifier;

#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: DashMap<Identifier, Arc<Mutex<()>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the content lock of `id`
    pub async fn lock(&self, id: &Identifier) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(id.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    /// Drops the lock slot of an identifier that no longer exists
    pub fn forget(&self, id: &Identifier) {
        self.locks.remove(id);
    }

    /// Drops the lock slot of `id` unless someone holds or awaits it
    pub fn prune(&self, id: &Identifier) {
        self.locks.remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
