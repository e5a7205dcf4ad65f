//! Busy tracking of in-flight remote mutations
//!
//! A counted multiset of identifiers: overlapping mutations of the same id
//! keep it busy until every one of them has ended. Purely advisory, nothing
//! here ever blocks.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use mirrorleaf_core::domain::Identifier;

#[derive(Debug, Default)]
pub struct MutationCoordinator {
    in_flight: DashMap<Identifier, usize>,
}

impl MutationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_mutation<'a, I>(&self, ids: I)
    where
        I: IntoIterator<Item = &'a Identifier>,
    {
        for id in ids {
            *self.in_flight.entry(id.clone()).or_insert(0) += 1;
            trace!(file_id = %id, "Mutation started");
        }
    }

    /// Ends one mutation per id; ids that were never begun are ignored
    pub fn end_mutation<'a, I>(&self, ids: I)
    where
        I: IntoIterator<Item = &'a Identifier>,
    {
        for id in ids {
            if let Entry::Occupied(mut slot) = self.in_flight.entry(id.clone()) {
                *slot.get_mut() -= 1;
                if *slot.get() == 0 {
                    slot.remove();
                }
                trace!(file_id = %id, "Mutation ended");
            }
        }
    }

    pub fn is_busy(&self, id: &Identifier) -> bool {
        self.in_flight.contains_key(id)
    }

    pub fn any_busy<'a, I>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a Identifier>,
    {
        ids.into_iter().any(|id| self.is_busy(id))
    }

    /// Number of distinct busy identifiers
    pub fn busy_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Begins a mutation over `ids` that ends when the guard drops
    pub fn guard(self: &Arc<Self>, ids: Vec<Identifier>) -> MutationGuard {
        self.begin_mutation(&ids);
        MutationGuard {
            coordinator: Arc::clone(self),
            ids,
        }
    }
}

/// Ends its mutation on drop, whatever path the operation took
#[must_use = "the mutation ends as soon as the guard is dropped"]
pub struct MutationGuard {
    coordinator: Arc<MutationCoordinator>,
    ids: Vec<Identifier>,
}

impl MutationGuard {
    pub fn ids(&self) -> &[Identifier] {
        &self.ids
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        self.coordinator.end_mutation(&self.ids);
    }
}
