//! Temporary identifier lifecycle
//!
//! A file created locally gets an `Identifier::Temp` at once and lives in
//! the tree, cache and history under it until the remote store confirms the
//! creation. Migration then moves every trace of the temp id over to the
//! real id while holding the temp id's content lock, so an edit made during
//! the round trip is neither lost nor written under a dead key.
//!
//! ```text
//! Pending -> Creating -> Migrating -> ReconcilingContent -> Terminal
//!               |  ^          \____________________________/^
//!               v  |
//!             Failed
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use mirrorleaf_core::domain::{
    Checksum, Content, DomainError, FileId, FilePath, Identifier,
};
use mirrorleaf_core::ports::{IContentStore, ISyncMetaStore, RemoteFile};
use mirrorleaf_history::EditHistoryTracker;

use crate::locks::EntityLocks;
use crate::SyncError;

/// Where a temp file stands in its creation lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CreationState {
    Pending,
    Creating,
    Migrating,
    ReconcilingContent,
    Terminal,
    Failed(String),
}

impl CreationState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Migrating => "migrating",
            Self::ReconcilingContent => "reconciling_content",
            Self::Terminal => "terminal",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    fn can_transition_to(&self, to: &CreationState) -> bool {
        use CreationState::*;
        matches!(
            (self, to),
            (Pending, Creating)
                | (Pending, Failed(_))
                | (Failed(_), Creating)
                | (Creating, Migrating)
                | (Creating, Failed(_))
                | (Migrating, ReconcilingContent)
                | (Migrating, Terminal)
                | (ReconcilingContent, Terminal)
        )
    }
}

/// What a create request is sent with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationRequest {
    pub path: FilePath,
    pub mime_type: String,
    pub payload: Content,
}

#[derive(Debug, Clone)]
struct TempRecord {
    state: CreationState,
    request: CreationRequest,
}

/// Result of migrating a temp id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Every local trace now lives under `real`
    Migrated {
        real: FileId,
        /// Content captured under the content lock
        content: Content,
        /// The captured content differs from the create payload
        needs_reconcile: bool,
    },
    /// The temp entry vanished (deleted or renamed) while the create was in flight
    Aborted,
}

pub struct TempIdManager {
    records: DashMap<Identifier, TempRecord>,
    aliases: DashMap<Identifier, FileId>,
    content: Arc<dyn IContentStore>,
    meta: Arc<dyn ISyncMetaStore>,
    history: Arc<EditHistoryTracker>,
    locks: Arc<EntityLocks>,
    root_folder_id: String,
}

impl TempIdManager {
    pub fn new(
        content: Arc<dyn IContentStore>,
        meta: Arc<dyn ISyncMetaStore>,
        history: Arc<EditHistoryTracker>,
        locks: Arc<EntityLocks>,
        root_folder_id: impl Into<String>,
    ) -> Self {
        Self {
            records: DashMap::new(),
            aliases: DashMap::new(),
            content,
            meta,
            history,
            locks,
            root_folder_id: root_folder_id.into(),
        }
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Starts tracking a temp id in `Pending`
    pub fn register(&self, temp: Identifier, request: CreationRequest) {
        debug!(temp_id = %temp, "Registered pending creation");
        self.records.insert(
            temp,
            TempRecord {
                state: CreationState::Pending,
                request,
            },
        );
    }

    /// Starts tracking a temp id whose creation is known to have failed
    pub fn register_failed(&self, temp: Identifier, request: CreationRequest, reason: &str) {
        self.records.insert(
            temp,
            TempRecord {
                state: CreationState::Failed(reason.to_string()),
                request,
            },
        );
    }

    pub fn state(&self, temp: &Identifier) -> Option<CreationState> {
        self.records.get(temp).map(|r| r.state.clone())
    }

    pub fn request(&self, temp: &Identifier) -> Option<CreationRequest> {
        self.records.get(temp).map(|r| r.request.clone())
    }

    pub fn is_tracked(&self, temp: &Identifier) -> bool {
        self.records.contains_key(temp)
    }

    /// True while the temp id awaits confirmation (failed ones included)
    pub fn is_pending(&self, temp: &Identifier) -> bool {
        self.records
            .get(temp)
            .is_some_and(|r| r.state != CreationState::Terminal)
    }

    pub fn tracked_ids(&self) -> Vec<Identifier> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Moves a temp id to another lifecycle state
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` for transitions outside the
    /// lifecycle and `DomainError::InvalidIdentifier` for untracked ids.
    pub fn transition(&self, temp: &Identifier, to: CreationState) -> Result<(), DomainError> {
        let mut record = self
            .records
            .get_mut(temp)
            .ok_or_else(|| DomainError::InvalidIdentifier(format!("{temp} is not tracked")))?;

        if !record.state.can_transition_to(&to) {
            return Err(DomainError::InvalidState {
                from: record.state.name().to_string(),
                to: to.name().to_string(),
            });
        }
        info!(temp_id = %temp, from = record.state.name(), to = to.name(), "Creation state changed");
        record.state = to;
        Ok(())
    }

    /// Marks the creation failed; the local file is kept
    pub fn fail(&self, temp: &Identifier, reason: &str) {
        if let Err(e) = self.transition(temp, CreationState::Failed(reason.to_string())) {
            warn!(temp_id = %temp, error = %e, "Could not mark creation failed");
        }
    }

    /// Replaces the payload sent by the next create attempt
    pub fn set_payload(&self, temp: &Identifier, payload: Content) {
        if let Some(mut record) = self.records.get_mut(temp) {
            record.request.payload = payload;
        }
    }

    /// Stops tracking a temp id
    pub fn remove(&self, temp: &Identifier) -> Option<CreationState> {
        self.records.remove(temp).map(|(_, r)| r.state)
    }

    /// Transfers tracking from `old` to `new` after a local rename
    ///
    /// The new id starts over in `Pending` unless the old one had failed.
    /// A create still in flight for `old` will abort at migration.
    pub fn rekey(&self, old: &Identifier, new: Identifier, path: FilePath, payload: Content) -> Option<CreationState> {
        let (_, record) = self.records.remove(old)?;
        let state = if record.state.is_failed() {
            record.state
        } else {
            CreationState::Pending
        };
        let request = CreationRequest {
            path,
            payload,
            ..record.request
        };
        debug!(from = %old, to = %new, state = state.name(), "Temp id re-minted");
        self.records.insert(
            new,
            TempRecord {
                state: state.clone(),
                request,
            },
        );
        Some(state)
    }

    // ========================================================================
    // Aliases
    // ========================================================================

    /// The real id a migrated temp id now stands for
    pub fn alias_of(&self, temp: &Identifier) -> Option<FileId> {
        self.aliases.get(temp).map(|a| a.clone())
    }

    /// Follows an alias if there is one
    pub fn resolve(&self, id: &Identifier) -> Identifier {
        if id.is_temp() {
            if let Some(real) = self.alias_of(id) {
                return Identifier::Real(real);
            }
        }
        id.clone()
    }

    // ========================================================================
    // Migration
    // ========================================================================

    /// Moves the cache entry, history and sync metadata of `temp` to the
    /// real id carried by `file`
    ///
    /// The temp id must be in `Creating`. On `Migrated` it is left in
    /// `Migrating`; the caller finishes the lifecycle. `publish` runs once
    /// the alias is registered and before the temp lock is released, so
    /// whoever waited on that lock finds the real id everywhere.
    #[tracing::instrument(skip(self, file, publish), fields(real_id = %file.id))]
    pub async fn migrate<F>(
        &self,
        temp: &Identifier,
        file: &RemoteFile,
        publish: F,
    ) -> Result<MigrationOutcome, SyncError>
    where
        F: FnOnce() + Send,
    {
        let _content_lock = self.locks.lock(temp).await;

        if let Err(e) = self.history.commit(temp).await {
            warn!(temp_id = %temp, error = %e, "Could not commit pending history before migration");
        }

        let entry = match self.content.get(temp).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(temp_id = %temp, error = %e, "Cache read failed during migration");
                None
            }
        };
        let Some(request) = self.request(temp) else {
            info!(temp_id = %temp, "Temp id no longer tracked, migration aborted");
            return Ok(MigrationOutcome::Aborted);
        };
        let Some(entry) = entry else {
            self.records.remove(temp);
            info!(temp_id = %temp, "Temp entry gone, migration aborted");
            return Ok(MigrationOutcome::Aborted);
        };

        self.transition(temp, CreationState::Migrating)?;

        let real = Identifier::Real(file.id.clone());
        let captured = entry.content.clone();
        let mut moved = entry.rekeyed(real.clone());
        moved.path = file.meta.name.clone();
        moved.baseline_checksum = Some(Checksum::of(&request.payload));
        moved.modified_time = file.meta.modified_time;

        if let Err(e) = self.content.put(&moved).await {
            warn!(file_id = %real, error = %e, "Could not cache migrated content");
        }
        if let Err(e) = self.content.delete(temp).await {
            warn!(temp_id = %temp, error = %e, "Could not delete temp cache entry");
        }
        if let Err(e) = self.history.migrate(temp, &real).await {
            warn!(temp_id = %temp, error = %e, "Could not migrate history");
        }
        if let Err(e) = self
            .meta
            .upsert_entry(&self.root_folder_id, &file.id, &file.meta)
            .await
        {
            warn!(file_id = %real, error = %e, "Could not record sync meta of created file");
        }

        self.aliases.insert(temp.clone(), file.id.clone());
        publish();
        self.locks.forget(temp);

        let needs_reconcile = captured != request.payload;
        info!(temp_id = %temp, file_id = %real, needs_reconcile, "Temp id migrated");

        Ok(MigrationOutcome::Migrated {
            real: file.id.clone(),
            content: captured,
            needs_reconcile,
        })
    }
}
