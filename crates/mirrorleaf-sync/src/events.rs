//! Typed observers
//!
//! Subscribers register a callback and get a [`SubscriptionId`] back.
//! Callbacks run synchronously on the task that emitted the event, after
//! the working state has been updated and its lock released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

use mirrorleaf_core::domain::Identifier;

/// Something observers may need to react to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The derived tree changed; call `get_tree` for the new one
    TreeChanged,
    /// A temp id was replaced by its real id everywhere
    IdMigrated { from: Identifier, to: Identifier },
    /// Cached content of a file changed
    ContentChanged { id: Identifier },
    /// Remote creation failed; the file stays local-only
    CreationFailed { id: Identifier, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    callbacks: RwLock<Vec<(SubscriptionId, Callback)>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns false when the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap_or_else(PoisonError::into_inner);
        let before = callbacks.len();
        callbacks.retain(|(sub, _)| *sub != id);
        callbacks.len() != before
    }

    pub fn emit(&self, event: &SyncEvent) {
        // Cloned out so a callback may subscribe or unsubscribe
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        debug!(?event, subscribers = callbacks.len(), "Emitting sync event");
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
