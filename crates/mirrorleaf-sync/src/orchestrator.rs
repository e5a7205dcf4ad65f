//! Tree synchronization orchestrator
//!
//! Owns the working file map the tree is derived from and drives every
//! local mutation through the same sequence:
//!
//! 1. Re-read the working state and validate the target
//! 2. Apply the change locally (tree, cache, history) and notify observers
//! 3. Mark the affected ids busy and send the remote call
//! 4. Apply the response; a `meta` snapshot, when present, replaces the
//!    working map wholesale
//!
//! Transient remote failures leave the optimistic local state in place and
//! return the error. An explicit rejection rolls the local change back.
//!
//! The working state sits behind a `std::sync::RwLock` that is never held
//! across an `.await`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mirrorleaf_core::config::Config;
use mirrorleaf_core::domain::{
    build_tree, files_under, CacheEntry, Checksum, Content, FileId, FileMeta, FilePath,
    Identifier, Origin, RemoteFileMeta, RemoteSnapshot, SyncSnapshot, TreeNode,
};
use mirrorleaf_core::ports::{
    ICipher, IContentStore, IHistoryStore, IRemoteStore, ISyncMetaStore, ListTreeResponse,
    Mutation, MutationResponse,
};
use mirrorleaf_history::{EditHistoryTracker, TimelineEntry};

use crate::coordinator::MutationCoordinator;
use crate::detector::ModificationDetector;
use crate::events::{Observers, SubscriptionId, SyncEvent};
use crate::locks::EntityLocks;
use crate::retry::{with_retry, RetryPolicy};
use crate::temp_ids::{CreationRequest, CreationState, MigrationOutcome, TempIdManager};
use crate::SyncError;

// ============================================================================
// Public types
// ============================================================================

/// External collaborators of the orchestrator
pub struct Ports {
    pub remote: Arc<dyn IRemoteStore>,
    pub cipher: Arc<dyn ICipher>,
    pub content: Arc<dyn IContentStore>,
    pub meta: Arc<dyn ISyncMetaStore>,
    pub history: Arc<dyn IHistoryStore>,
}

/// Files a folder operation will touch, shown to the user for confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    pub folder: FilePath,
    /// New folder path for a rename, `None` for a delete
    pub target: Option<FilePath>,
    pub affected: Vec<Identifier>,
}

impl BatchPlan {
    pub fn count(&self) -> usize {
        self.affected.len()
    }
}

/// Per-file outcome of a folder operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<Identifier>,
    pub failed: Vec<(Identifier, String)>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Relocation {
    Rename,
    Move,
}

// ============================================================================
// Working state
// ============================================================================

struct WorkingState {
    files: BTreeMap<Identifier, FileMeta>,
    snapshot: SyncSnapshot,
    tree: Vec<TreeNode>,
}

impl WorkingState {
    fn new(root_folder_id: &str) -> Self {
        Self {
            files: BTreeMap::new(),
            snapshot: SyncSnapshot::empty(root_folder_id),
            tree: Vec::new(),
        }
    }

    fn rebuild(&mut self) {
        self.tree = build_tree(&self.files);
    }

    fn path_taken(&self, path: &FilePath, except: Option<&Identifier>) -> bool {
        self.files
            .iter()
            .any(|(id, meta)| meta.name == *path && Some(id) != except)
    }
}

/// Mime type reported to the remote store for a new file
fn guess_mime_type(path: &FilePath, content: &Content) -> String {
    let ext = path
        .file_name()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());

    let mime = match ext.as_deref() {
        Some("md" | "markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("html" | "htm") => "text/html",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("pdf") => "application/pdf",
        _ => match content {
            Content::Text(_) => "text/plain",
            Content::Binary(_) => "application/octet-stream",
        },
    };
    mime.to_string()
}

// ============================================================================
// TreeSyncOrchestrator
// ============================================================================

pub struct TreeSyncOrchestrator {
    this: Weak<Self>,
    root_folder_id: String,
    cache_enabled: bool,
    retry: RetryPolicy,

    remote: Arc<dyn IRemoteStore>,
    cipher: Arc<dyn ICipher>,
    content: Arc<dyn IContentStore>,
    meta: Arc<dyn ISyncMetaStore>,
    history: Arc<EditHistoryTracker>,

    detector: ModificationDetector,
    coordinator: Arc<MutationCoordinator>,
    temp_ids: TempIdManager,
    locks: Arc<EntityLocks>,
    observers: Observers,

    state: RwLock<WorkingState>,
    generations: DashMap<Identifier, u64>,
    creations: Mutex<Vec<JoinHandle<()>>>,
}

impl TreeSyncOrchestrator {
    pub fn new(ports: Ports, config: &Config) -> Arc<Self> {
        let root = config.store.root_folder_id.clone();
        let locks = Arc::new(EntityLocks::new());
        let history = Arc::new(EditHistoryTracker::from_config(ports.history, &config.history));

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            root_folder_id: root.clone(),
            cache_enabled: config.cache.enabled,
            retry: RetryPolicy::from_config(&config.remote),
            detector: ModificationDetector::new(
                Arc::clone(&ports.content),
                Arc::clone(&ports.meta),
                root.clone(),
            ),
            temp_ids: TempIdManager::new(
                Arc::clone(&ports.content),
                Arc::clone(&ports.meta),
                Arc::clone(&history),
                Arc::clone(&locks),
                root.clone(),
            ),
            coordinator: Arc::new(MutationCoordinator::new()),
            observers: Observers::new(),
            state: RwLock::new(WorkingState::new(&root)),
            generations: DashMap::new(),
            creations: Mutex::new(Vec::new()),
            remote: ports.remote,
            cipher: ports.cipher,
            content: ports.content,
            meta: ports.meta,
            history,
            locks,
        })
    }

    pub fn root_folder_id(&self) -> &str {
        &self.root_folder_id
    }

    fn read_state(&self) -> RwLockReadGuard<'_, WorkingState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, WorkingState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn on_tree_changed<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_tree(&self) -> Vec<TreeNode> {
        self.read_state().tree.clone()
    }

    /// The working file map the tree is derived from
    pub fn files(&self) -> BTreeMap<Identifier, FileMeta> {
        self.read_state().files.clone()
    }

    /// Follows a migrated temp id to its real id
    pub fn resolve(&self, id: &Identifier) -> Identifier {
        self.temp_ids.resolve(id)
    }

    /// A virtual folder is busy when any file under it is
    pub fn is_busy(&self, id: &Identifier) -> bool {
        let id = self.resolve(id);
        if let Identifier::Virtual(folder) = &id {
            let under = files_under(&self.read_state().files, folder);
            return self.coordinator.any_busy(&under);
        }
        self.coordinator.is_busy(&id)
    }

    pub async fn is_modified(&self, id: &Identifier) -> bool {
        self.detector.is_modified(&self.resolve(id)).await
    }

    pub async fn is_cached(&self, id: &Identifier) -> bool {
        self.cached_entry(&self.resolve(id)).await.is_some()
    }

    pub fn is_pending_creation(&self, id: &Identifier) -> bool {
        self.temp_ids.is_pending(id)
    }

    pub fn creation_state(&self, id: &Identifier) -> Option<CreationState> {
        self.temp_ids.state(id)
    }

    pub fn is_shared(&self, id: &Identifier) -> bool {
        let id = self.resolve(id);
        let Some(file_id) = id.as_file_id() else {
            return false;
        };
        self.read_state()
            .snapshot
            .files
            .get(file_id)
            .is_some_and(|meta| meta.shared)
    }

    /// Starts a new modification scan pass
    pub fn begin_scan(&self) {
        self.detector.begin_scan();
    }

    // ========================================================================
    // Loading and refresh
    // ========================================================================

    /// Rebuilds the working state from the local database alone
    ///
    /// Temp entries found in the cache belong to creations that were never
    /// confirmed; they come back as `Failed` so the user can retry them.
    #[tracing::instrument(skip(self))]
    pub async fn load_cached(&self) -> Result<usize, SyncError> {
        let snapshot = self
            .meta
            .load(&self.root_folder_id)
            .await
            .context("loading sync snapshot")
            .map_err(SyncError::Storage)?
            .unwrap_or_else(|| SyncSnapshot::empty(self.root_folder_id.clone()));

        let cached_ids = self
            .content
            .list_all_ids()
            .await
            .context("listing cached files")
            .map_err(SyncError::Storage)?;

        let mut temps = BTreeMap::new();
        for id in cached_ids.into_iter().filter(Identifier::is_temp) {
            let Some(entry) = self.cached_entry(&id).await else {
                continue;
            };
            let mime_type = guess_mime_type(&entry.path, &entry.content);
            if !self.temp_ids.is_tracked(&id) {
                self.temp_ids.register_failed(
                    id.clone(),
                    CreationRequest {
                        path: entry.path.clone(),
                        mime_type: mime_type.clone(),
                        payload: entry.content.clone(),
                    },
                    "creation was not confirmed before shutdown",
                );
            }
            temps.insert(id, FileMeta::new(entry.path, mime_type));
        }

        let count = {
            let mut state = self.write_state();
            state.files = snapshot
                .files
                .iter()
                .map(|(id, meta)| (Identifier::Real(id.clone()), meta.to_file_meta()))
                .chain(temps)
                .collect();
            state.snapshot = snapshot;
            state.rebuild();
            state.files.len()
        };

        self.detector.begin_scan();
        self.observers.emit(&SyncEvent::TreeChanged);
        info!(files = count, "Working state loaded from cache");
        Ok(count)
    }

    /// Fetches the authoritative remote listing and rebuilds the tree
    ///
    /// Temp files still awaiting creation or still cached survive; temp
    /// nodes with neither are dropped as dangling.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        let ListTreeResponse { items, meta } = with_retry(self.retry, "list_tree", || {
            self.remote.list_tree(&self.root_folder_id, true)
        })
        .await
        .context("listing remote tree")
        .map_err(SyncError::Remote)?;

        let snapshot = meta.unwrap_or_else(|| RemoteSnapshot {
            last_updated_at: Some(Utc::now()),
            files: items.into_iter().map(|f| (f.id, f.meta)).collect(),
        });
        let count = snapshot.files.len();

        self.apply_snapshot(snapshot).await;
        info!(files = count, "Tree refreshed");
        Ok(count)
    }

    async fn apply_snapshot(&self, remote: RemoteSnapshot) {
        self.install_snapshot(remote).await;
        self.observers.emit(&SyncEvent::TreeChanged);
    }

    /// Replaces the working map with an authoritative snapshot, without
    /// notifying
    async fn install_snapshot(&self, remote: RemoteSnapshot) {
        let snapshot = SyncSnapshot::from_remote(self.root_folder_id.clone(), remote);
        if let Err(e) = self.meta.save(&snapshot).await {
            warn!(error = %e, "Could not persist sync snapshot");
        }

        let temps: Vec<Identifier> = self
            .read_state()
            .files
            .keys()
            .filter(|id| id.is_temp())
            .cloned()
            .collect();

        let mut keep = BTreeSet::new();
        for id in temps {
            if self.temp_ids.is_pending(&id) || self.cached_entry(&id).await.is_some() {
                keep.insert(id);
            } else {
                debug!(temp_id = %id, "Dropping dangling temp node");
            }
        }

        let departed: Vec<Identifier> = {
            let mut state = self.write_state();
            let mut files: BTreeMap<Identifier, FileMeta> = snapshot
                .files
                .iter()
                .map(|(id, meta)| (Identifier::Real(id.clone()), meta.to_file_meta()))
                .collect();
            // Only temps that are still present now; a migration may have
            // replaced one while the cache was being checked
            for (id, meta) in state.files.iter().filter(|(id, _)| keep.contains(*id)) {
                files.insert(id.clone(), meta.clone());
            }
            let departed: Vec<Identifier> = state
                .files
                .keys()
                .filter(|id| id.is_real() && !files.contains_key(*id))
                .cloned()
                .collect();
            state.files = files;
            state.snapshot = snapshot;
            state.rebuild();
            departed
        };

        for id in &departed {
            self.release_id(id);
        }
        self.detector.begin_scan();
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn cached_entry(&self, id: &Identifier) -> Option<CacheEntry> {
        match self.content.get(id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file_id = %id, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn put_entry(&self, entry: &CacheEntry) {
        if let Err(e) = self.content.put(entry).await {
            warn!(file_id = %entry.file_id, error = %e, "Cache write failed, file stays uncached");
        }
    }

    fn path_of_file(&self, id: &Identifier) -> Option<FilePath> {
        self.read_state().files.get(id).map(|meta| meta.name.clone())
    }

    fn require_file(&self, id: &Identifier) -> Result<FileMeta, SyncError> {
        if id.is_virtual() {
            return Err(SyncError::InvalidTarget(format!("{id} is a folder")));
        }
        self.read_state()
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.clone()))
    }

    fn require_real(&self, id: &Identifier) -> Result<FileId, SyncError> {
        match id {
            Identifier::Real(file_id) => Ok(file_id.clone()),
            Identifier::Temp(_) => Err(SyncError::PendingCreation(id.clone())),
            Identifier::Virtual(_) => Err(SyncError::InvalidTarget(format!("{id} is a folder"))),
        }
    }

    fn require_folder(&self, id: &Identifier) -> Result<FilePath, SyncError> {
        let Identifier::Virtual(folder) = id else {
            return Err(SyncError::InvalidTarget(format!("{id} is not a folder")));
        };
        let exists = self
            .read_state()
            .files
            .values()
            .any(|meta| meta.name.is_descendant_of(folder));
        if exists {
            Ok(folder.clone())
        } else {
            Err(SyncError::NotFound(id.clone()))
        }
    }

    fn generation(&self, id: &Identifier) -> u64 {
        self.generations.get(id).map(|g| *g).unwrap_or(0)
    }

    fn bump_generation(&self, id: &Identifier) {
        *self.generations.entry(id.clone()).or_insert(0) += 1;
    }

    /// Takes the content lock of whatever `id` currently resolves to
    ///
    /// Re-resolves after the wait: a temp id may have migrated meanwhile.
    async fn lock_resolved(&self, id: &Identifier) -> (Identifier, OwnedMutexGuard<()>) {
        loop {
            let target = self.resolve(id);
            let guard = self.locks.lock(&target).await;
            if self.resolve(id) == target {
                return (target, guard);
            }
        }
    }

    /// Sends a mutation, retrying transient failures
    async fn send(&self, mutation: Mutation) -> Result<MutationResponse, SyncError> {
        let action = mutation.action();
        let response = with_retry(self.retry, action, || self.remote.mutate(mutation.clone()))
            .await
            .with_context(|| format!("{action} request"))
            .map_err(SyncError::Remote)?;

        if !response.ok {
            return Err(SyncError::Rejected {
                action: action.to_string(),
                reason: response
                    .error
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }
        Ok(response)
    }

    /// Applies the `file` and `meta` parts of a successful response
    async fn settle_mutation(&self, response: MutationResponse) {
        let MutationResponse { file, meta, .. } = response;
        if let Some(file) = file {
            self.record_remote_meta(&file.id, file.meta).await;
        }
        if let Some(snapshot) = meta {
            self.install_snapshot(snapshot).await;
        }
    }

    /// Stores the remote metadata of a file present in the working map
    async fn record_remote_meta(&self, id: &FileId, meta: RemoteFileMeta) {
        let ident = Identifier::Real(id.clone());
        {
            let mut state = self.write_state();
            if let Some(slot) = state.files.get_mut(&ident) {
                *slot = meta.to_file_meta();
            }
            state.snapshot.upsert(id.clone(), meta.clone());
            state.rebuild();
        }
        if let Err(e) = self.meta.upsert_entry(&self.root_folder_id, id, &meta).await {
            warn!(file_id = %id, error = %e, "Could not persist sync meta");
        }
        self.detector.invalidate(&ident);
    }

    /// Edits the known remote metadata of a file in place
    async fn patch_remote_meta<F>(&self, id: &FileId, patch: F)
    where
        F: FnOnce(&mut RemoteFileMeta) + Send,
    {
        let updated = {
            let mut state = self.write_state();
            state.snapshot.files.get_mut(id).map(|meta| {
                patch(meta);
                meta.clone()
            })
        };
        if let Some(meta) = updated {
            if let Err(e) = self.meta.upsert_entry(&self.root_folder_id, id, &meta).await {
                warn!(file_id = %id, error = %e, "Could not persist sync meta");
            }
        }
        self.detector.invalidate(&Identifier::Real(id.clone()));
    }

    async fn forget_remote_file(&self, id: &FileId) {
        self.write_state().snapshot.remove(id);
        if let Err(e) = self.meta.remove_entry(&self.root_folder_id, id).await {
            warn!(file_id = %id, error = %e, "Could not remove sync meta");
        }
    }

    /// Deletes the cache entry and history of a file
    async fn discard_local(&self, id: &Identifier) {
        {
            let _lock = self.locks.lock(id).await;
            if let Err(e) = self.content.delete(id).await {
                warn!(file_id = %id, error = %e, "Could not delete cache entry");
            }
            if let Err(e) = self.history.discard(id).await {
                warn!(file_id = %id, error = %e, "Could not delete history");
            }
        }
        self.release_id(id);
    }

    /// Drops the per-id bookkeeping of a file that left the working map
    fn release_id(&self, id: &Identifier) {
        self.detector.forget(id);
        self.generations.remove(id);
        self.locks.prune(id);
        self.history.release(id);
    }

    fn remove_node(&self, id: &Identifier) -> Option<FileMeta> {
        let mut state = self.write_state();
        let removed = state.files.remove(id);
        state.rebuild();
        removed
    }

    fn insert_node(&self, id: Identifier, meta: FileMeta) {
        let mut state = self.write_state();
        state.files.insert(id, meta);
        state.rebuild();
    }

    /// Points the working map and the cache entry at a new path
    async fn set_local_path(&self, id: &Identifier, path: &FilePath) {
        {
            let mut state = self.write_state();
            if let Some(meta) = state.files.get_mut(id) {
                meta.name = path.clone();
            }
            state.rebuild();
        }
        if let Err(e) = self.content.rename(id, path).await {
            warn!(file_id = %id, error = %e, "Could not update cached path");
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Creates a file locally under a temp id and confirms it in the background
    #[tracing::instrument(skip(self, content))]
    pub async fn create_file(&self, path: FilePath, content: Content) -> Result<Identifier, SyncError> {
        let temp = Identifier::temp(path.clone());
        if self.read_state().path_taken(&path, None) || self.temp_ids.is_tracked(&temp) {
            return Err(SyncError::InvalidTarget(format!("{path} already exists")));
        }

        let mime_type = guess_mime_type(&path, &content);
        self.put_entry(&CacheEntry::new(temp.clone(), path.clone(), content.clone()))
            .await;
        if let Some(text) = content.as_text() {
            if let Err(e) = self.history.record_snapshot(&temp, text).await {
                warn!(temp_id = %temp, error = %e, "Could not record initial history");
            }
        }

        self.temp_ids.register(
            temp.clone(),
            CreationRequest {
                path: path.clone(),
                mime_type: mime_type.clone(),
                payload: content,
            },
        );
        self.insert_node(temp.clone(), FileMeta::new(path, mime_type));
        self.observers.emit(&SyncEvent::TreeChanged);

        self.spawn_creation(temp.clone());
        Ok(temp)
    }

    /// Sends the create request of a failed temp file again
    pub async fn retry_creation(&self, id: &Identifier) -> Result<(), SyncError> {
        let state = self
            .temp_ids
            .state(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        if !state.is_failed() {
            return Err(SyncError::InvalidTarget(format!(
                "{id} is {}, not failed",
                state.name()
            )));
        }

        if let Some(entry) = self.cached_entry(id).await {
            self.temp_ids.set_payload(id, entry.content);
        }
        self.spawn_creation(id.clone());
        Ok(())
    }

    /// Waits until every background creation has finished
    pub async fn await_pending_creations(&self) {
        loop {
            let handles = std::mem::take(
                &mut *self.creations.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Creation task failed to complete");
                }
            }
        }
    }

    fn spawn_creation(&self, temp: Identifier) {
        let Some(this) = self.this.upgrade() else {
            warn!(temp_id = %temp, "Orchestrator is shutting down, creation not sent");
            return;
        };
        let handle = tokio::spawn(async move {
            if let Err(e) = this.confirm_creation(&temp).await {
                warn!(temp_id = %temp, error = %e, "Creation not confirmed");
            }
        });

        let mut creations = self.creations.lock().unwrap_or_else(PoisonError::into_inner);
        creations.retain(|h| !h.is_finished());
        creations.push(handle);
    }

    async fn confirm_creation(&self, temp: &Identifier) -> Result<(), SyncError> {
        let Some(request) = self.temp_ids.request(temp) else {
            debug!(temp_id = %temp, "Creation withdrawn before it was sent");
            return Ok(());
        };
        self.temp_ids.transition(temp, CreationState::Creating)?;

        let response = {
            let _busy = self.coordinator.guard(vec![temp.clone()]);
            self.send(Mutation::Create {
                path: request.path,
                content: request.payload,
                mime_type: request.mime_type,
            })
            .await
        };

        let (file, snapshot) = match response {
            Ok(MutationResponse {
                file: Some(file),
                meta,
                ..
            }) => (file, meta),
            Ok(_) => {
                let err = SyncError::Rejected {
                    action: "create".to_string(),
                    reason: "response carried no file".to_string(),
                };
                self.fail_creation(temp, &err);
                return Err(err);
            }
            Err(err) => {
                self.fail_creation(temp, &err);
                return Err(err);
            }
        };

        let real_id = Identifier::Real(file.id.clone());
        let outcome = self
            .temp_ids
            .migrate(temp, &file, || {
                let mut state = self.write_state();
                state.files.remove(temp);
                state.files.insert(real_id.clone(), file.meta.to_file_meta());
                state.snapshot.upsert(file.id.clone(), file.meta.clone());
                state.rebuild();
            })
            .await?;
        let MigrationOutcome::Migrated {
            real,
            content,
            needs_reconcile,
        } = outcome
        else {
            return Ok(());
        };

        if let Some(snapshot) = snapshot {
            self.install_snapshot(snapshot).await;
        }
        self.detector.forget(temp);
        self.generations.remove(temp);
        self.detector.invalidate(&real_id);
        self.bump_generation(&real_id);
        self.observers.emit(&SyncEvent::IdMigrated {
            from: temp.clone(),
            to: real_id.clone(),
        });

        if needs_reconcile {
            self.temp_ids
                .transition(temp, CreationState::ReconcilingContent)?;
            let _busy = self.coordinator.guard(vec![real_id.clone()]);
            match self
                .send(Mutation::Update {
                    id: real.clone(),
                    content: content.clone(),
                })
                .await
            {
                Ok(response) => self.settle_push(&real, &content, response).await,
                Err(e) => {
                    warn!(file_id = %real, error = %e, "Reconciling update failed, file stays modified");
                }
            }
        }

        self.temp_ids.transition(temp, CreationState::Terminal)?;
        self.temp_ids.remove(temp);
        Ok(())
    }

    fn fail_creation(&self, temp: &Identifier, err: &SyncError) {
        let reason = err.to_string();
        self.temp_ids.fail(temp, &reason);
        self.observers.emit(&SyncEvent::CreationFailed {
            id: temp.clone(),
            reason,
        });
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Writes new content to the cache; nothing is sent remotely
    #[tracing::instrument(skip(self, content))]
    pub async fn save_content(&self, id: &Identifier, content: Content) -> Result<(), SyncError> {
        if id.is_virtual() {
            return Err(SyncError::InvalidTarget(format!("{id} is a folder")));
        }
        let (target, _lock) = self.lock_resolved(id).await;

        let entry = match self.cached_entry(&target).await {
            Some(entry) => entry.with_content(content.clone()),
            None => {
                let path = self
                    .path_of_file(&target)
                    .ok_or_else(|| SyncError::NotFound(target.clone()))?;
                CacheEntry::new(target.clone(), path, content.clone())
            }
        };
        self.put_entry(&entry).await;

        self.bump_generation(&target);
        if let Some(text) = content.as_text() {
            self.history.note_edit(&target, text);
        }
        self.detector.invalidate(&target);
        self.observers.emit(&SyncEvent::ContentChanged { id: target });
        Ok(())
    }

    /// Cached content, fetched from the remote store on a miss
    ///
    /// A fetched response is discarded when the file was written locally
    /// while the fetch was in flight.
    #[tracing::instrument(skip(self))]
    pub async fn open_file(&self, id: &Identifier) -> Result<Content, SyncError> {
        let id = self.resolve(id);
        if id.is_virtual() {
            return Err(SyncError::InvalidTarget(format!("{id} is a folder")));
        }
        if self.cache_enabled || id.is_temp() {
            if let Some(entry) = self.cached_entry(&id).await {
                return Ok(entry.content);
            }
        }
        let Identifier::Real(file_id) = &id else {
            return Err(SyncError::NotFound(id.clone()));
        };
        let path = self
            .path_of_file(&id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;

        let generation = self.generation(&id);
        let remote = with_retry(self.retry, "fetch_content", || {
            self.remote.fetch_content(file_id)
        })
        .await
        .with_context(|| format!("fetching content of {file_id}"))
        .map_err(SyncError::Remote)?;

        let _lock = self.locks.lock(&id).await;
        if self.generation(&id) != generation {
            debug!(file_id = %id, "Discarding stale fetch response");
            return Ok(match self.cached_entry(&id).await {
                Some(entry) => entry.content,
                None => remote.content,
            });
        }

        if let Err(e) = self.history.commit(&id).await {
            warn!(file_id = %id, error = %e, "Could not commit history before accepting fetched content");
        }
        let entry = CacheEntry::synced(id.clone(), path, remote.content.clone(), remote.modified_time);
        self.put_entry(&entry).await;
        if let Some(text) = remote.content.as_text() {
            if let Err(e) = self.history.seed(&id, text).await {
                warn!(file_id = %id, error = %e, "Could not seed history");
            }
            if let Err(e) = self
                .history
                .observe_remote(&id, text, remote.modified_time)
                .await
            {
                warn!(file_id = %id, error = %e, "Could not record fetched content in remote history");
            }
        }

        let checksum = remote.checksum.unwrap_or_else(|| entry.checksum.clone());
        let modified_time = remote.modified_time;
        self.patch_remote_meta(file_id, move |meta| {
            meta.checksum = Some(checksum);
            if modified_time.is_some() {
                meta.modified_time = modified_time;
            }
        })
        .await;

        debug!(file_id = %id, bytes = remote.content.len(), "Content fetched");
        Ok(remote.content)
    }

    /// Uploads the cached content of a real file
    #[tracing::instrument(skip(self))]
    pub async fn push_content(&self, id: &Identifier) -> Result<(), SyncError> {
        let id = self.resolve(id);
        let file_id = self.require_real(&id)?;
        let entry = self
            .cached_entry(&id)
            .await
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;

        if let Err(e) = self.history.commit(&id).await {
            warn!(file_id = %id, error = %e, "Could not commit history before push");
        }

        let _busy = self.coordinator.guard(vec![id.clone()]);
        let response = self
            .send(Mutation::Update {
                id: file_id.clone(),
                content: entry.content.clone(),
            })
            .await?;
        self.settle_push(&file_id, &entry.content, response).await;

        info!(file_id = %id, "Content pushed");
        self.observers.emit(&SyncEvent::ContentChanged { id });
        Ok(())
    }

    /// Records a successful upload of `pushed`
    ///
    /// The cache entry is only marked synced if it still holds what was
    /// pushed; an edit made during the upload keeps the file modified.
    async fn settle_push(&self, id: &FileId, pushed: &Content, response: MutationResponse) {
        let ident = Identifier::Real(id.clone());
        let pushed_checksum = Checksum::of(pushed);

        let modified_time = response
            .file
            .as_ref()
            .and_then(|f| f.meta.modified_time)
            .or_else(|| Some(Utc::now()));
        if response.file.is_none() {
            let checksum = pushed_checksum.clone();
            self.patch_remote_meta(id, move |meta| {
                meta.checksum = Some(checksum);
                meta.modified_time = modified_time;
            })
            .await;
        }

        {
            let _lock = self.locks.lock(&ident).await;
            match self.cached_entry(&ident).await {
                Some(mut entry) if entry.checksum == pushed_checksum => {
                    entry.mark_synced(modified_time);
                    self.put_entry(&entry).await;
                }
                Some(_) => debug!(file_id = %id, "Edited during upload, stays modified"),
                None => {}
            }
        }

        self.settle_mutation(response).await;
        self.detector.invalidate(&ident);
    }

    // ========================================================================
    // Rename, move, delete
    // ========================================================================

    /// Renames a file within its folder; returns its (possibly new) id
    #[tracing::instrument(skip(self))]
    pub async fn rename_file(&self, id: &Identifier, new_name: &str) -> Result<Identifier, SyncError> {
        let id = self.resolve(id);
        let current = self.require_file(&id)?;
        let new_path = current.name.with_file_name(new_name)?;
        self.relocate(&id, current.name, new_path, Relocation::Rename)
            .await
    }

    /// Moves a file into `new_parent` (`None` = top level)
    #[tracing::instrument(skip(self))]
    pub async fn move_file(
        &self,
        id: &Identifier,
        new_parent: Option<&FilePath>,
    ) -> Result<Identifier, SyncError> {
        let id = self.resolve(id);
        let current = self.require_file(&id)?;
        let new_path = FilePath::from_parent(new_parent, current.name.file_name())?;
        self.relocate(&id, current.name, new_path, Relocation::Move)
            .await
    }

    async fn relocate(
        &self,
        id: &Identifier,
        from: FilePath,
        to: FilePath,
        kind: Relocation,
    ) -> Result<Identifier, SyncError> {
        if from == to {
            return Ok(id.clone());
        }
        if self.read_state().path_taken(&to, Some(id)) {
            return Err(SyncError::InvalidTarget(format!("{to} already exists")));
        }

        match id {
            Identifier::Temp(_) => self.rename_temp(id, to, kind).await,
            Identifier::Real(file_id) => {
                self.relocate_real(file_id, from, to, kind).await?;
                Ok(id.clone())
            }
            Identifier::Virtual(_) => Err(SyncError::InvalidTarget(format!("{id} is a folder"))),
        }
    }

    async fn relocate_real(
        &self,
        file_id: &FileId,
        from: FilePath,
        to: FilePath,
        kind: Relocation,
    ) -> Result<(), SyncError> {
        let ident = Identifier::Real(file_id.clone());
        let _busy = self.coordinator.guard(vec![ident.clone()]);

        self.set_local_path(&ident, &to).await;
        self.observers.emit(&SyncEvent::TreeChanged);

        let mutation = match kind {
            Relocation::Rename => Mutation::Rename {
                id: file_id.clone(),
                new_path: to.clone(),
            },
            Relocation::Move => Mutation::Move {
                id: file_id.clone(),
                new_path: to.clone(),
            },
        };

        match self.send(mutation).await {
            Ok(response) => {
                let path = to.clone();
                self.patch_remote_meta(file_id, move |meta| meta.name = path)
                    .await;
                self.settle_mutation(response).await;
                self.observers.emit(&SyncEvent::TreeChanged);
                info!(file_id = %file_id, from = %from, to = %to, "File relocated");
                Ok(())
            }
            Err(err @ SyncError::Rejected { .. }) => {
                self.set_local_path(&ident, &from).await;
                self.observers.emit(&SyncEvent::TreeChanged);
                Err(err)
            }
            Err(err) => {
                warn!(file_id = %file_id, error = %err, "Relocation not confirmed, local change kept");
                Err(err)
            }
        }
    }

    /// Re-mints a temp id for a new path
    ///
    /// A create request still in flight for the old id aborts at migration.
    /// A migration that finished while this call waited for the content
    /// lock turns the rename into a rename of the real file.
    async fn rename_temp(
        &self,
        old: &Identifier,
        to: FilePath,
        kind: Relocation,
    ) -> Result<Identifier, SyncError> {
        let new = Identifier::temp(to.clone());
        if self.temp_ids.is_tracked(&new) {
            return Err(SyncError::InvalidTarget(format!("{to} already exists")));
        }

        let lock = self.locks.lock(old).await;
        if let Identifier::Real(file_id) = self.resolve(old) {
            drop(lock);
            debug!(temp_id = %old, file_id = %file_id, "Migrated while waiting, renaming the real file");
            return self.relocate_migrated(file_id, to, kind).await;
        }
        if !self.temp_ids.is_tracked(old) {
            return Err(SyncError::NotFound(old.clone()));
        }

        let state = {
            let _lock = lock;
            let payload = match self.cached_entry(old).await {
                Some(entry) => {
                    let mut moved = entry.rekeyed(new.clone());
                    moved.path = to.clone();
                    self.put_entry(&moved).await;
                    if let Err(e) = self.content.delete(old).await {
                        warn!(temp_id = %old, error = %e, "Could not delete old temp entry");
                    }
                    moved.content
                }
                None => self
                    .temp_ids
                    .request(old)
                    .map(|r| r.payload)
                    .unwrap_or_else(|| Content::Text(String::new())),
            };
            if let Err(e) = self.history.migrate(old, &new).await {
                warn!(temp_id = %old, error = %e, "Could not move history to re-minted id");
            }
            self.temp_ids.rekey(old, new.clone(), to.clone(), payload)
        };
        self.locks.forget(old);
        self.generations.remove(old);

        {
            let mut working = self.write_state();
            if let Some(mut meta) = working.files.remove(old) {
                meta.name = to;
                working.files.insert(new.clone(), meta);
            }
            working.rebuild();
        }
        self.detector.forget(old);
        self.observers.emit(&SyncEvent::TreeChanged);

        if state == Some(CreationState::Pending) {
            self.spawn_creation(new.clone());
        }
        Ok(new)
    }

    /// Relocates the real file a temp id migrated to
    async fn relocate_migrated(
        &self,
        file_id: FileId,
        to: FilePath,
        kind: Relocation,
    ) -> Result<Identifier, SyncError> {
        let real = Identifier::Real(file_id.clone());
        let from = self.require_file(&real)?.name;
        if from == to {
            return Ok(real);
        }
        if self.read_state().path_taken(&to, Some(&real)) {
            return Err(SyncError::InvalidTarget(format!("{to} already exists")));
        }
        self.relocate_real(&file_id, from, to, kind).await?;
        Ok(real)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_file(&self, id: &Identifier) -> Result<(), SyncError> {
        let id = self.resolve(id);
        let meta = self.require_file(&id)?;

        match &id {
            Identifier::Real(file_id) => {
                let _busy = self.coordinator.guard(vec![id.clone()]);
                self.remove_node(&id);
                self.observers.emit(&SyncEvent::TreeChanged);

                match self.send(Mutation::Delete { id: file_id.clone() }).await {
                    Ok(response) => {
                        self.forget_remote_file(file_id).await;
                        self.discard_local(&id).await;
                        self.settle_mutation(response).await;
                        self.observers.emit(&SyncEvent::TreeChanged);
                        info!(file_id = %id, "File deleted");
                        Ok(())
                    }
                    Err(err @ SyncError::Rejected { .. }) => {
                        self.insert_node(id.clone(), meta);
                        self.observers.emit(&SyncEvent::TreeChanged);
                        Err(err)
                    }
                    Err(err) => {
                        warn!(file_id = %id, error = %err, "Delete not confirmed, local change kept");
                        Err(err)
                    }
                }
            }
            _ => {
                self.delete_temp(&id).await;
                self.observers.emit(&SyncEvent::TreeChanged);
                Ok(())
            }
        }
    }

    /// Local-only removal of a file that never reached the remote store
    async fn delete_temp(&self, id: &Identifier) {
        self.temp_ids.remove(id);
        self.discard_local(id).await;
        self.remove_node(id);
        info!(temp_id = %id, "Unconfirmed file deleted locally");
    }

    // ========================================================================
    // Folder batches
    // ========================================================================

    pub fn plan_folder_rename(&self, folder: &Identifier, new_name: &str) -> Result<BatchPlan, SyncError> {
        let path = self.require_folder(folder)?;
        let target = path.with_file_name(new_name)?;
        let affected = files_under(&self.read_state().files, &path);
        Ok(BatchPlan {
            folder: path,
            target: Some(target),
            affected,
        })
    }

    pub fn plan_folder_delete(&self, folder: &Identifier) -> Result<BatchPlan, SyncError> {
        let path = self.require_folder(folder)?;
        let affected = files_under(&self.read_state().files, &path);
        Ok(BatchPlan {
            folder: path,
            target: None,
            affected,
        })
    }

    fn check_plan(&self, plan: &BatchPlan) -> Result<(), SyncError> {
        let current = files_under(&self.read_state().files, &plan.folder);
        if current != plan.affected {
            return Err(SyncError::InvalidTarget(format!(
                "contents of {} changed since the plan was made",
                plan.folder
            )));
        }
        Ok(())
    }

    /// Renames every file of a planned folder, one remote call at a time
    ///
    /// Files that fail keep their old path; a full refresh always follows.
    #[tracing::instrument(skip(self, plan), fields(folder = %plan.folder, files = plan.count()))]
    pub async fn rename_folder(&self, plan: &BatchPlan) -> Result<BatchReport, SyncError> {
        let target = plan
            .target
            .clone()
            .ok_or_else(|| SyncError::InvalidTarget("plan has no target folder".to_string()))?;
        self.check_plan(plan)?;

        let mut moves = Vec::with_capacity(plan.count());
        {
            let state = self.read_state();
            for id in &plan.affected {
                if let Some(new_path) = state
                    .files
                    .get(id)
                    .and_then(|meta| meta.name.replace_prefix(&plan.folder, &target))
                {
                    moves.push((id.clone(), new_path));
                }
            }
            let taken = moves.iter().any(|(_, path)| {
                state
                    .files
                    .iter()
                    .any(|(id, meta)| meta.name == *path && !plan.affected.contains(id))
            });
            if taken {
                return Err(SyncError::InvalidTarget(format!(
                    "{target} would overwrite existing files"
                )));
            }
        }

        let busy = self.coordinator.guard(plan.affected.clone());
        let mut report = BatchReport::default();
        for (id, new_path) in moves {
            let result = match &id {
                Identifier::Real(file_id) => self.rename_in_batch(file_id, &new_path).await,
                _ => self
                    .rename_temp(&id, new_path, Relocation::Rename)
                    .await
                    .map(|_| ()),
            };
            match result {
                Ok(()) => report.succeeded.push(id),
                Err(e) => {
                    warn!(file_id = %id, error = %e, "Folder rename step failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        drop(busy);

        self.reconcile_after_batch().await;
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Folder rename finished"
        );
        Ok(report)
    }

    async fn rename_in_batch(&self, file_id: &FileId, new_path: &FilePath) -> Result<(), SyncError> {
        let response = self
            .send(Mutation::Rename {
                id: file_id.clone(),
                new_path: new_path.clone(),
            })
            .await?;

        let ident = Identifier::Real(file_id.clone());
        self.set_local_path(&ident, new_path).await;
        let path = new_path.clone();
        self.patch_remote_meta(file_id, move |meta| meta.name = path)
            .await;
        if let Some(file) = response.file {
            self.record_remote_meta(&file.id, file.meta).await;
        }
        self.observers.emit(&SyncEvent::TreeChanged);
        Ok(())
    }

    /// Deletes every file of a planned folder
    ///
    /// Remote deletes run one at a time; local cleanup of the deleted files
    /// runs concurrently.
    #[tracing::instrument(skip(self, plan), fields(folder = %plan.folder, files = plan.count()))]
    pub async fn delete_folder(&self, plan: &BatchPlan) -> Result<BatchReport, SyncError> {
        self.check_plan(plan)?;

        let busy = self.coordinator.guard(plan.affected.clone());
        let mut report = BatchReport::default();
        let mut deleted_temps = Vec::new();
        let mut deleted_real = Vec::new();

        for id in &plan.affected {
            match id {
                Identifier::Real(file_id) => {
                    match self.send(Mutation::Delete { id: file_id.clone() }).await {
                        Ok(_) => {
                            self.remove_node(id);
                            deleted_real.push(file_id.clone());
                            report.succeeded.push(id.clone());
                        }
                        Err(e) => {
                            warn!(file_id = %id, error = %e, "Folder delete step failed");
                            report.failed.push((id.clone(), e.to_string()));
                        }
                    }
                }
                _ => {
                    self.temp_ids.remove(id);
                    self.remove_node(id);
                    deleted_temps.push(id.clone());
                    report.succeeded.push(id.clone());
                }
            }
        }
        self.observers.emit(&SyncEvent::TreeChanged);

        for file_id in &deleted_real {
            self.forget_remote_file(file_id).await;
        }
        let cleanup: Vec<Identifier> = deleted_real
            .into_iter()
            .map(Identifier::Real)
            .chain(deleted_temps)
            .collect();
        join_all(cleanup.iter().map(|id| self.discard_local(id))).await;
        drop(busy);

        self.reconcile_after_batch().await;
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Folder delete finished"
        );
        Ok(report)
    }

    async fn reconcile_after_batch(&self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Reconciliation after folder batch failed");
        }
    }

    // ========================================================================
    // Encryption and sharing
    // ========================================================================

    #[tracing::instrument(skip(self, password))]
    pub async fn encrypt_file(&self, id: &Identifier, password: &str) -> Result<(), SyncError> {
        let id = self.resolve(id);
        let file_id = self.require_real(&id)?;
        let content = self.open_file(&id).await?;
        let plaintext = content
            .as_text()
            .ok_or_else(|| SyncError::InvalidTarget(format!("{id} is not a text file")))?;

        let ciphertext = self.cipher.encrypt(plaintext, password).await?;

        let _busy = self.coordinator.guard(vec![id.clone()]);
        let response = self
            .send(Mutation::Encrypt {
                id: file_id.clone(),
                ciphertext: ciphertext.clone(),
            })
            .await?;
        self.adopt_transformed(&file_id, Content::Text(ciphertext), response)
            .await;

        info!(file_id = %id, "File encrypted");
        Ok(())
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn decrypt_file(&self, id: &Identifier, password: &str) -> Result<(), SyncError> {
        let id = self.resolve(id);
        let file_id = self.require_real(&id)?;
        let content = self.open_file(&id).await?;
        let ciphertext = content
            .as_text()
            .ok_or_else(|| SyncError::InvalidTarget(format!("{id} is not a text file")))?;

        let plaintext = self.cipher.decrypt(ciphertext, password).await?;

        let _busy = self.coordinator.guard(vec![id.clone()]);
        let response = self
            .send(Mutation::Decrypt {
                id: file_id.clone(),
                plaintext: plaintext.clone(),
            })
            .await?;
        self.adopt_transformed(&file_id, Content::Text(plaintext), response)
            .await;

        info!(file_id = %id, "File decrypted");
        Ok(())
    }

    /// Replaces the cached content and history of a file with content the
    /// remote store now holds
    async fn adopt_transformed(&self, id: &FileId, content: Content, response: MutationResponse) {
        let ident = Identifier::Real(id.clone());
        let modified_time = response.file.as_ref().and_then(|f| f.meta.modified_time);

        if let Some(path) = self.path_of_file(&ident) {
            let _lock = self.locks.lock(&ident).await;
            if let Err(e) = self.history.discard(&ident).await {
                warn!(file_id = %id, error = %e, "Could not drop history");
            }
            let entry = CacheEntry::synced(ident.clone(), path, content.clone(), modified_time);
            self.put_entry(&entry).await;
            if let Some(text) = content.as_text() {
                if let Err(e) = self.history.seed(&ident, text).await {
                    warn!(file_id = %id, error = %e, "Could not seed history");
                }
            }
        }

        if response.file.is_none() {
            let checksum = Checksum::of(&content);
            self.patch_remote_meta(id, move |meta| {
                meta.checksum = Some(checksum);
                meta.modified_time = modified_time.or_else(|| Some(Utc::now()));
            })
            .await;
        }
        self.settle_mutation(response).await;
        self.bump_generation(&ident);
        self.observers.emit(&SyncEvent::ContentChanged { id: ident });
    }

    pub async fn publish_file(&self, id: &Identifier) -> Result<(), SyncError> {
        self.set_shared(id, true).await
    }

    pub async fn unpublish_file(&self, id: &Identifier) -> Result<(), SyncError> {
        self.set_shared(id, false).await
    }

    #[tracing::instrument(skip(self))]
    async fn set_shared(&self, id: &Identifier, shared: bool) -> Result<(), SyncError> {
        let id = self.resolve(id);
        let file_id = self.require_real(&id)?;

        let _busy = self.coordinator.guard(vec![id.clone()]);
        let mutation = if shared {
            Mutation::Publish { id: file_id.clone() }
        } else {
            Mutation::Unpublish { id: file_id.clone() }
        };
        let response = self.send(mutation).await?;

        if response.file.is_none() {
            self.patch_remote_meta(&file_id, move |meta| meta.shared = shared)
                .await;
        }
        self.settle_mutation(response).await;
        self.observers.emit(&SyncEvent::TreeChanged);
        info!(file_id = %id, shared, "Sharing changed");
        Ok(())
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Commits the pending history snapshot of a file now
    pub async fn commit_history(&self, id: &Identifier) -> Result<bool, SyncError> {
        Ok(self.history.commit(&self.resolve(id)).await?.is_some())
    }

    /// Commits every pending history snapshot
    pub async fn flush_history(&self) -> Result<usize, SyncError> {
        Ok(self.history.flush_all().await?)
    }

    pub async fn history_timeline(&self, id: &Identifier) -> Result<Vec<TimelineEntry>, SyncError> {
        Ok(self.history.timeline(&self.resolve(id)).await?)
    }

    /// Makes a recorded state the current content of a file
    ///
    /// The restored content is saved and recorded; restoring the current
    /// tip records nothing.
    #[tracing::instrument(skip(self))]
    pub async fn restore_history(
        &self,
        id: &Identifier,
        origin: Origin,
        index: usize,
    ) -> Result<Content, SyncError> {
        let id = self.resolve(id);
        self.history.commit(&id).await?;

        let text = match origin {
            Origin::Local => self.history.restore_to(&id, index).await?,
            Origin::Remote => self.history.restore_remote_to(&id, index).await?,
        };
        let content = Content::Text(text);
        self.save_content(&id, content.clone()).await?;
        if let Some(text) = content.as_text() {
            self.history.record_snapshot(&id, text).await?;
        }
        Ok(content)
    }

    /// Imports the remote store's revision list as the remote history
    #[tracing::instrument(skip(self))]
    pub async fn import_remote_history(&self, id: &Identifier) -> Result<usize, SyncError> {
        let id = self.resolve(id);
        let file_id = self.require_real(&id)?;
        self.history.commit(&id).await?;

        let revisions = with_retry(self.retry, "list_revisions", || {
            self.remote.list_revisions(&file_id)
        })
        .await
        .with_context(|| format!("listing revisions of {file_id}"))
        .map_err(SyncError::Remote)?;

        Ok(self.history.import_remote(&id, &revisions).await?)
    }

    /// Commits settled history snapshots periodically until `shutdown`
    ///
    /// Everything still pending is committed on shutdown.
    pub fn spawn_history_flusher(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match this.history.flush_due().await {
                            Ok(0) => {}
                            Ok(committed) => debug!(committed, "Flushed settled history"),
                            Err(e) => warn!(error = %e, "History flush failed"),
                        }
                    }
                    _ = shutdown.cancelled() => {
                        if let Err(e) = this.history.flush_all().await {
                            warn!(error = %e, "Final history flush failed");
                        }
                        debug!("History flusher stopped");
                        break;
                    }
                }
            }
        })
    }

    // ========================================================================
    // Cache
    // ========================================================================

    /// Drops every cached real file; unconfirmed temp files are kept
    #[tracing::instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<usize, SyncError> {
        let ids = self
            .content
            .list_all_ids()
            .await
            .context("listing cached files")
            .map_err(SyncError::Storage)?;
        let real: Vec<Identifier> = ids.into_iter().filter(Identifier::is_real).collect();

        let results = join_all(real.iter().map(|id| async move {
            let _lock = self.locks.lock(id).await;
            self.content.delete(id).await
        }))
        .await;

        let mut removed = 0;
        for (id, result) in real.iter().zip(results) {
            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(file_id = %id, error = %e, "Could not evict cache entry"),
            }
        }

        self.detector.begin_scan();
        info!(removed, "Cache cleared");
        Ok(removed)
    }
}
