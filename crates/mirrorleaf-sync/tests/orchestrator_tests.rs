//! Integration tests for TreeSyncOrchestrator
//!
//! The local stores are the real SQLite adapters on an in-memory database.
//! The remote store is an in-process mock whose calls can be held at a gate
//! (`tokio::sync::Notify`) so tests can act while a request is in flight.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;

use mirrorleaf_cache::{DatabasePool, SqliteContentStore, SqliteHistoryStore, SqliteSyncMetaStore};
use mirrorleaf_core::config::ConfigBuilder;
use mirrorleaf_core::domain::{
    CacheEntry, Checksum, Content, FileId, FilePath, Identifier, Origin, RemoteFileMeta,
    RemoteSnapshot, TreeNode,
};
use mirrorleaf_core::ports::{
    CipherError, ICipher, IContentStore, IHistoryStore, IRemoteStore, ISyncMetaStore,
    ListTreeResponse, Mutation, MutationResponse, RemoteContent, RemoteFile, RemoteRevision,
};
use mirrorleaf_sync::{CreationState, Ports, SyncError, SyncEvent, TreeSyncOrchestrator};

// ============================================================================
// Mock remote store
// ============================================================================

#[derive(Default)]
struct MockRemote {
    files: Mutex<BTreeMap<FileId, (RemoteFileMeta, Content)>>,
    calls: Mutex<Vec<Mutation>>,
    next_id: AtomicU64,
    gates: Mutex<HashMap<&'static str, Arc<Notify>>>,
    entered: Notify,
    rejected_ids: Mutex<BTreeSet<FileId>>,
    fail_creates: AtomicBool,
    offline: AtomicBool,
    revisions: Mutex<BTreeMap<FileId, Vec<RemoteRevision>>>,
}

impl MockRemote {
    fn seed(&self, id: &str, name: &str, body: &str) -> FileId {
        let id = file_id(id);
        let content = Content::from(body);
        self.files
            .lock()
            .unwrap()
            .insert(id.clone(), (meta_for(name, &content), content));
        id
    }

    /// Holds every call of `action` until the returned gate is notified
    fn gate(&self, action: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(action, Arc::clone(&gate));
        gate
    }

    async fn pass_gate(&self, action: &'static str) {
        let gate = self.gates.lock().unwrap().get(action).cloned();
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }
    }

    fn reject(&self, id: &FileId) {
        self.rejected_ids.lock().unwrap().insert(id.clone());
    }

    fn calls(&self) -> Vec<Mutation> {
        self.calls.lock().unwrap().clone()
    }

    fn content_of(&self, id: &FileId) -> Option<Content> {
        self.files.lock().unwrap().get(id).map(|(_, c)| c.clone())
    }

    fn name_of(&self, id: &FileId) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(id)
            .map(|(m, _)| m.name.to_string())
    }

    fn file(&self, id: &FileId) -> Option<RemoteFile> {
        self.files.lock().unwrap().get(id).map(|(meta, _)| RemoteFile {
            id: id.clone(),
            meta: meta.clone(),
        })
    }

    fn update(&self, id: &FileId, f: impl FnOnce(&mut RemoteFileMeta, &mut Content)) -> MutationResponse {
        let found = {
            let mut files = self.files.lock().unwrap();
            match files.get_mut(id) {
                Some((meta, content)) => {
                    f(meta, content);
                    meta.checksum = Some(Checksum::of(content));
                    meta.modified_time = Some(Utc::now());
                    true
                }
                None => false,
            }
        };
        if found {
            MutationResponse::success(self.file(id), None)
        } else {
            MutationResponse::rejected("not found")
        }
    }
}

#[async_trait]
impl IRemoteStore for MockRemote {
    async fn list_tree(&self, _folder_id: &str, _refresh: bool) -> anyhow::Result<ListTreeResponse> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("network unreachable"));
        }
        let files = self.files.lock().unwrap();
        let items: Vec<RemoteFile> = files
            .iter()
            .map(|(id, (meta, _))| RemoteFile {
                id: id.clone(),
                meta: meta.clone(),
            })
            .collect();
        let snapshot = RemoteSnapshot {
            last_updated_at: Some(Utc::now()),
            files: files.iter().map(|(id, (meta, _))| (id.clone(), meta.clone())).collect(),
        };
        Ok(ListTreeResponse {
            items,
            meta: Some(snapshot),
        })
    }

    async fn mutate(&self, mutation: Mutation) -> anyhow::Result<MutationResponse> {
        self.calls.lock().unwrap().push(mutation.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("network unreachable"));
        }
        if let Some(target) = mutation.target() {
            if self.rejected_ids.lock().unwrap().contains(target) {
                return Ok(MutationResponse::rejected("permission denied"));
            }
        }

        let response = match mutation {
            Mutation::Create {
                path,
                content,
                mime_type,
            } => {
                self.pass_gate("create").await;
                if self.fail_creates.load(Ordering::SeqCst) {
                    return Err(anyhow!("quota exceeded"));
                }
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let id = file_id(&format!("created-{n}"));
                let mut meta = meta_for(path.as_str(), &content);
                meta.mime_type = mime_type;
                self.files
                    .lock()
                    .unwrap()
                    .insert(id.clone(), (meta.clone(), content));
                MutationResponse::success(Some(RemoteFile { id, meta }), None)
            }
            Mutation::Update { id, content } => self.update(&id, |_, c| *c = content),
            Mutation::Rename { id, new_path } | Mutation::Move { id, new_path } => {
                self.pass_gate("rename").await;
                self.update(&id, |m, _| m.name = new_path)
            }
            Mutation::Delete { id } => {
                if self.files.lock().unwrap().remove(&id).is_some() {
                    MutationResponse::success(None, None)
                } else {
                    MutationResponse::rejected("not found")
                }
            }
            Mutation::Encrypt { id, ciphertext } => {
                self.update(&id, |_, c| *c = Content::Text(ciphertext))
            }
            Mutation::Decrypt { id, plaintext } => {
                self.update(&id, |_, c| *c = Content::Text(plaintext))
            }
            Mutation::Publish { id } => self.update(&id, |m, _| m.shared = true),
            Mutation::Unpublish { id } => self.update(&id, |m, _| m.shared = false),
        };
        Ok(response)
    }

    async fn fetch_content(&self, id: &FileId) -> anyhow::Result<RemoteContent> {
        self.pass_gate("fetch").await;
        let files = self.files.lock().unwrap();
        let (meta, content) = files.get(id).ok_or_else(|| anyhow!("file {id} not found"))?;
        Ok(RemoteContent {
            content: content.clone(),
            checksum: meta.checksum.clone(),
            modified_time: meta.modified_time,
        })
    }

    async fn list_revisions(&self, id: &FileId) -> anyhow::Result<Vec<RemoteRevision>> {
        Ok(self
            .revisions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Gated content store
// ============================================================================

/// Delegates to the SQLite store; a single call per `(action, id)` can be held
///
/// `get` is held after the read so the caller sees the value from before
/// the gate. `delete` is held before it reaches the store.
struct GatedContent {
    inner: Arc<dyn IContentStore>,
    gates: Mutex<HashMap<(&'static str, Identifier), Arc<Notify>>>,
    entered: Notify,
}

impl GatedContent {
    fn new(inner: Arc<dyn IContentStore>) -> Self {
        Self {
            inner,
            gates: Mutex::new(HashMap::new()),
            entered: Notify::new(),
        }
    }

    fn gate(&self, action: &'static str, id: &Identifier) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert((action, id.clone()), Arc::clone(&gate));
        gate
    }

    async fn pass_gate(&self, action: &'static str, id: &Identifier) {
        let gate = self.gates.lock().unwrap().remove(&(action, id.clone()));
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }
    }
}

#[async_trait]
impl IContentStore for GatedContent {
    async fn get(&self, id: &Identifier) -> anyhow::Result<Option<CacheEntry>> {
        let entry = self.inner.get(id).await?;
        self.pass_gate("get", id).await;
        Ok(entry)
    }

    async fn put(&self, entry: &CacheEntry) -> anyhow::Result<()> {
        self.inner.put(entry).await
    }

    async fn delete(&self, id: &Identifier) -> anyhow::Result<bool> {
        self.pass_gate("delete", id).await;
        self.inner.delete(id).await
    }

    async fn list_all_ids(&self) -> anyhow::Result<BTreeSet<Identifier>> {
        self.inner.list_all_ids().await
    }

    async fn rename(&self, id: &Identifier, new_path: &FilePath) -> anyhow::Result<bool> {
        self.inner.rename(id, new_path).await
    }

    async fn clear(&self) -> anyhow::Result<u64> {
        self.inner.clear().await
    }
}

/// Reversible stand-in for a real cipher
struct PrefixCipher;

#[async_trait]
impl ICipher for PrefixCipher {
    async fn encrypt(&self, plaintext: &str, password: &str) -> Result<String, CipherError> {
        Ok(format!("enc[{password}]:{plaintext}"))
    }

    async fn decrypt(&self, ciphertext: &str, password: &str) -> Result<String, CipherError> {
        ciphertext
            .strip_prefix(&format!("enc[{password}]:"))
            .map(str::to_string)
            .ok_or(CipherError::WrongPassword)
    }
}

// ============================================================================
// Test helpers
// ============================================================================

struct Harness {
    sync: Arc<TreeSyncOrchestrator>,
    remote: Arc<MockRemote>,
    /// The store behind `gated`; reads and writes here skip the gates
    content: Arc<dyn IContentStore>,
    gated: Arc<GatedContent>,
    history: Arc<dyn IHistoryStore>,
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl Harness {
    fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    fn file_names(&self) -> Vec<String> {
        self.sync
            .files()
            .values()
            .map(|meta| meta.name.to_string())
            .collect()
    }
}

async fn setup() -> Harness {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let content: Arc<dyn IContentStore> = Arc::new(SqliteContentStore::new(pool.pool().clone()));
    let meta: Arc<dyn ISyncMetaStore> = Arc::new(SqliteSyncMetaStore::new(pool.pool().clone()));
    let history: Arc<dyn IHistoryStore> = Arc::new(SqliteHistoryStore::new(pool.pool().clone()));
    let remote = Arc::new(MockRemote::default());
    let gated = Arc::new(GatedContent::new(Arc::clone(&content)));

    let config = ConfigBuilder::new()
        .root_folder_id("root")
        .remote_max_retries(0)
        .history_debounce_ms(60_000)
        .build();

    let sync = TreeSyncOrchestrator::new(
        Ports {
            remote: Arc::clone(&remote) as Arc<dyn IRemoteStore>,
            cipher: Arc::new(PrefixCipher),
            content: Arc::clone(&gated) as Arc<dyn IContentStore>,
            meta,
            history: Arc::clone(&history),
        },
        &config,
    );

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    sync.on_tree_changed(move |event| sink.lock().unwrap().push(event.clone()));

    Harness {
        sync,
        remote,
        content,
        gated,
        history,
        events,
    }
}

fn path(s: &str) -> FilePath {
    FilePath::new(s.to_string()).unwrap()
}

fn file_id(s: &str) -> FileId {
    FileId::new(s.to_string()).unwrap()
}

fn real(s: &str) -> Identifier {
    Identifier::Real(file_id(s))
}

fn folder(s: &str) -> Identifier {
    Identifier::virtual_folder(path(s))
}

fn meta_for(name: &str, content: &Content) -> RemoteFileMeta {
    RemoteFileMeta {
        name: path(name),
        mime_type: "text/markdown".to_string(),
        modified_time: Some(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()),
        checksum: Some(Checksum::of(content)),
        shared: false,
    }
}

fn text(s: &str) -> Content {
    Content::from(s)
}

// ============================================================================
// Refresh and tree
// ============================================================================

#[tokio::test]
async fn test_refresh_builds_tree_from_flat_names() {
    let h = setup().await;
    h.remote.seed("f1", "notes/b.md", "b");
    h.remote.seed("f2", "notes/a.md", "a");
    h.remote.seed("f3", "todo.md", "t");

    assert_eq!(h.sync.refresh().await.unwrap(), 3);

    let tree = h.sync.get_tree();
    assert_eq!(tree.len(), 2);
    assert!(tree[0].is_folder());
    assert_eq!(tree[0].name(), "notes");
    let names: Vec<&str> = tree[0].children().iter().map(TreeNode::name).collect();
    assert_eq!(names, vec!["a.md", "b.md"]);
    assert_eq!(tree[1].name(), "todo.md");
    assert!(h.events().contains(&SyncEvent::TreeChanged));
}

#[tokio::test]
async fn test_refresh_failure_keeps_tree() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();

    h.remote.offline.store(true, Ordering::SeqCst);
    let err = h.sync.refresh().await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(h.file_names(), vec!["a.md"]);
}

#[tokio::test]
async fn test_nested_creation_and_leaf_delete() {
    let h = setup().await;
    let temp = h
        .sync
        .create_file(path("2026/02/14/note.md"), text("hi"))
        .await
        .unwrap();
    h.sync.await_pending_creations().await;

    let tree = h.sync.get_tree();
    assert_eq!(tree.len(), 1);
    let mut node = &tree[0];
    for name in ["2026", "02", "14"] {
        assert!(node.is_folder());
        assert_eq!(node.name(), name);
        assert_eq!(node.children().len(), 1);
        node = &node.children()[0];
    }
    assert_eq!(node.name(), "note.md");

    let id = h.sync.resolve(&temp);
    assert!(id.is_real());
    h.sync.delete_file(&id).await.unwrap();
    assert!(h.sync.get_tree().is_empty());
    assert!(!h.sync.is_cached(&id).await);
}

// ============================================================================
// Creation lifecycle
// ============================================================================

#[tokio::test]
async fn test_confirmed_creation_leaves_no_trace_of_temp_id() {
    let h = setup().await;
    let temp = h
        .sync
        .create_file(path("docs/new.md"), text("hello"))
        .await
        .unwrap();
    assert!(temp.is_temp());
    assert!(h.sync.files().contains_key(&temp));

    h.sync.await_pending_creations().await;

    let id = h.sync.resolve(&temp);
    assert!(id.is_real());
    assert!(!h.sync.is_pending_creation(&temp));
    assert!(h.sync.creation_state(&temp).is_none());

    let files = h.sync.files();
    assert!(!files.contains_key(&temp));
    assert_eq!(files[&id].name, path("docs/new.md"));

    let cached = h.content.list_all_ids().await.unwrap();
    assert!(cached.iter().all(|i| !i.is_temp()));
    assert!(cached.contains(&id));
    let histories = h.history.list_ids().await.unwrap();
    assert!(!histories.contains(&temp));
    assert!(histories.contains(&id));

    assert!(!h.sync.is_modified(&id).await);
    assert!(h.events().contains(&SyncEvent::IdMigrated {
        from: temp.clone(),
        to: id.clone(),
    }));
}

#[tokio::test]
async fn test_edit_during_creation_is_reconciled() {
    let h = setup().await;
    let gate = h.remote.gate("create");

    let temp = h.sync.create_file(path("a.md"), text("C0")).await.unwrap();
    h.remote.entered.notified().await;
    assert!(h.sync.is_busy(&temp));
    assert_eq!(h.sync.creation_state(&temp), Some(CreationState::Creating));

    h.sync.save_content(&temp, text("C1")).await.unwrap();
    gate.notify_one();
    h.sync.await_pending_creations().await;

    let id = h.sync.resolve(&temp);
    let real_id = id.as_file_id().unwrap().clone();
    let entry = h.content.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.content, text("C1"));

    let update = h.remote.calls().into_iter().find(|m| matches!(m, Mutation::Update { .. }));
    assert_eq!(
        update,
        Some(Mutation::Update {
            id: real_id.clone(),
            content: text("C1"),
        })
    );
    assert_eq!(h.remote.content_of(&real_id), Some(text("C1")));
    assert!(!h.sync.is_modified(&id).await);
}

#[tokio::test]
async fn test_edit_addressed_to_migrated_temp_lands_on_real_id() {
    let h = setup().await;
    let temp = h.sync.create_file(path("a.md"), text("one")).await.unwrap();
    h.sync.await_pending_creations().await;

    h.sync.save_content(&temp, text("two")).await.unwrap();

    let id = h.sync.resolve(&temp);
    assert_eq!(h.content.get(&id).await.unwrap().unwrap().content, text("two"));
    assert!(h.content.get(&temp).await.unwrap().is_none());
    assert!(h.sync.is_modified(&id).await);
}

#[tokio::test]
async fn test_delete_during_creation_aborts_migration() {
    let h = setup().await;
    let gate = h.remote.gate("create");

    let temp = h.sync.create_file(path("x.md"), text("x")).await.unwrap();
    h.remote.entered.notified().await;
    h.sync.delete_file(&temp).await.unwrap();
    assert!(h.sync.get_tree().is_empty());

    gate.notify_one();
    h.sync.await_pending_creations().await;

    assert!(h.sync.files().is_empty());
    assert!(h.content.list_all_ids().await.unwrap().is_empty());
    assert_eq!(h.sync.resolve(&temp), temp);

    // The remote file shows up on the next full refresh
    h.sync.refresh().await.unwrap();
    assert_eq!(h.file_names(), vec!["x.md"]);
}

#[tokio::test]
async fn test_rename_during_creation_reissues_creation() {
    let h = setup().await;
    let gate = h.remote.gate("create");

    let temp = h.sync.create_file(path("a.md"), text("body")).await.unwrap();
    h.remote.entered.notified().await;

    let renamed = h.sync.rename_file(&temp, "b.md").await.unwrap();
    assert_eq!(renamed, Identifier::temp(path("b.md")));
    assert_eq!(h.file_names(), vec!["b.md"]);

    gate.notify_one();
    h.remote.entered.notified().await;
    gate.notify_one();
    h.sync.await_pending_creations().await;

    let files = h.sync.files();
    assert_eq!(files.len(), 1);
    let (id, meta) = files.iter().next().unwrap();
    assert!(id.is_real());
    assert_eq!(meta.name, path("b.md"));
    assert_eq!(h.sync.resolve(&renamed), *id);
    assert_eq!(h.content.get(id).await.unwrap().unwrap().content, text("body"));
}

#[tokio::test]
async fn test_rename_while_temp_id_migrates_renames_the_real_file() {
    let h = setup().await;
    let temp = Identifier::temp(path("a.md"));
    let gate = h.gated.gate("delete", &temp);

    assert_eq!(h.sync.create_file(path("a.md"), text("body")).await.unwrap(), temp);
    h.gated.entered.notified().await;

    let renamer = {
        let sync = Arc::clone(&h.sync);
        let temp = temp.clone();
        tokio::spawn(async move { sync.rename_file(&temp, "b.md").await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!renamer.is_finished());

    gate.notify_one();
    let renamed = renamer.await.unwrap().unwrap();
    h.sync.await_pending_creations().await;

    assert!(renamed.is_real());
    assert_eq!(h.sync.resolve(&temp), renamed);
    assert_eq!(h.file_names(), vec!["b.md"]);
    let file_id = renamed.as_file_id().unwrap();
    assert_eq!(h.remote.name_of(file_id).as_deref(), Some("b.md"));
    assert_eq!(h.remote.files.lock().unwrap().len(), 1);

    let cached = h.content.list_all_ids().await.unwrap();
    assert_eq!(cached.into_iter().collect::<Vec<_>>(), vec![renamed.clone()]);
    assert_eq!(h.content.get(&renamed).await.unwrap().unwrap().path, path("b.md"));
}

#[tokio::test]
async fn test_failed_creation_is_kept_and_retryable() {
    let h = setup().await;
    h.remote.fail_creates.store(true, Ordering::SeqCst);

    let temp = h.sync.create_file(path("a.md"), text("keep me")).await.unwrap();
    h.sync.await_pending_creations().await;

    assert!(matches!(h.sync.creation_state(&temp), Some(CreationState::Failed(_))));
    assert!(h.sync.is_pending_creation(&temp));
    assert!(h.sync.files().contains_key(&temp));
    assert!(h.sync.is_cached(&temp).await);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, SyncEvent::CreationFailed { id, .. } if *id == temp)));

    // Failed files survive a refresh
    h.sync.refresh().await.unwrap();
    assert!(h.sync.files().contains_key(&temp));

    h.sync.save_content(&temp, text("edited")).await.unwrap();
    h.remote.fail_creates.store(false, Ordering::SeqCst);
    h.sync.retry_creation(&temp).await.unwrap();
    h.sync.await_pending_creations().await;

    let id = h.sync.resolve(&temp);
    assert!(id.is_real());
    assert_eq!(h.remote.content_of(id.as_file_id().unwrap()), Some(text("edited")));
}

#[tokio::test]
async fn test_retry_creation_requires_failed_state() {
    let h = setup().await;
    let gate = h.remote.gate("create");
    let temp = h.sync.create_file(path("a.md"), text("x")).await.unwrap();
    h.remote.entered.notified().await;

    let err = h.sync.retry_creation(&temp).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTarget(_)));

    gate.notify_one();
    h.sync.await_pending_creations().await;
}

#[tokio::test]
async fn test_create_rejects_existing_path() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();

    let err = h.sync.create_file(path("a.md"), text("b")).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTarget(_)));
}

#[tokio::test]
async fn test_operations_on_pending_file_need_confirmation() {
    let h = setup().await;
    let gate = h.remote.gate("create");
    let temp = h.sync.create_file(path("a.md"), text("x")).await.unwrap();
    h.remote.entered.notified().await;

    assert!(matches!(
        h.sync.push_content(&temp).await,
        Err(SyncError::PendingCreation(_))
    ));
    assert!(matches!(
        h.sync.publish_file(&temp).await,
        Err(SyncError::PendingCreation(_))
    ));
    assert!(!h.sync.is_modified(&temp).await);

    gate.notify_one();
    h.sync.await_pending_creations().await;
}

// ============================================================================
// Content and modification
// ============================================================================

#[tokio::test]
async fn test_modified_flag_follows_checksum_and_push() {
    let h = setup().await;
    let f1 = h.remote.seed("f1", "a.md", "v1\n");
    h.sync.refresh().await.unwrap();
    let id = real("f1");

    assert!(!h.sync.is_cached(&id).await);
    assert_eq!(h.sync.open_file(&id).await.unwrap(), text("v1\n"));
    assert!(h.sync.is_cached(&id).await);
    assert!(!h.sync.is_modified(&id).await);

    // Line-ending and trailing-newline differences are not modifications
    h.sync.save_content(&id, text("v1\r\n\r\n")).await.unwrap();
    assert!(!h.sync.is_modified(&id).await);

    h.sync.save_content(&id, text("v2")).await.unwrap();
    assert!(h.sync.is_modified(&id).await);

    h.sync.push_content(&id).await.unwrap();
    assert!(!h.sync.is_modified(&id).await);
    assert_eq!(h.remote.content_of(&f1), Some(text("v2")));
}

#[tokio::test]
async fn test_stale_fetch_does_not_overwrite_local_edit() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "remote");
    h.sync.refresh().await.unwrap();
    let id = real("f1");
    let gate = h.remote.gate("fetch");

    let reader = {
        let sync = Arc::clone(&h.sync);
        let id = id.clone();
        tokio::spawn(async move { sync.open_file(&id).await })
    };
    h.remote.entered.notified().await;
    h.sync.save_content(&id, text("local")).await.unwrap();
    gate.notify_one();

    assert_eq!(reader.await.unwrap().unwrap(), text("local"));
    assert_eq!(h.content.get(&id).await.unwrap().unwrap().content, text("local"));
    assert!(h.sync.is_modified(&id).await);
}

#[tokio::test]
async fn test_edit_during_modification_check_is_not_masked() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "v1");
    h.sync.refresh().await.unwrap();
    let id = real("f1");
    h.sync.open_file(&id).await.unwrap();
    h.sync.begin_scan();

    let gate = h.gated.gate("get", &id);
    let checker = {
        let sync = Arc::clone(&h.sync);
        let id = id.clone();
        tokio::spawn(async move { sync.is_modified(&id).await })
    };
    h.gated.entered.notified().await;

    h.sync.save_content(&id, text("v2")).await.unwrap();
    gate.notify_one();

    // The check read the content from before the edit
    assert!(!checker.await.unwrap());
    assert!(h.sync.is_modified(&id).await);
}

#[tokio::test]
async fn test_save_to_unknown_file_is_not_found() {
    let h = setup().await;
    let err = h.sync.save_content(&real("nope"), text("x")).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    let err = h.sync.save_content(&folder("a"), text("x")).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTarget(_)));
}

#[tokio::test]
async fn test_clear_cache_keeps_unconfirmed_files() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();
    h.sync.open_file(&real("f1")).await.unwrap();

    h.remote.fail_creates.store(true, Ordering::SeqCst);
    let temp = h.sync.create_file(path("b.md"), text("b")).await.unwrap();
    h.sync.await_pending_creations().await;

    assert_eq!(h.sync.clear_cache().await.unwrap(), 1);
    assert!(!h.sync.is_cached(&real("f1")).await);
    assert!(h.sync.is_cached(&temp).await);
}

// ============================================================================
// Rename, move, delete
// ============================================================================

#[tokio::test]
async fn test_rename_and_move_file() {
    let h = setup().await;
    let f1 = h.remote.seed("f1", "inbox/a.md", "a");
    h.sync.refresh().await.unwrap();
    let id = real("f1");

    h.sync.rename_file(&id, "b.md").await.unwrap();
    assert_eq!(h.remote.name_of(&f1).as_deref(), Some("inbox/b.md"));

    h.sync.move_file(&id, Some(&path("archive/2026"))).await.unwrap();
    assert_eq!(h.remote.name_of(&f1).as_deref(), Some("archive/2026/b.md"));

    h.sync.move_file(&id, None).await.unwrap();
    assert_eq!(h.file_names(), vec!["b.md"]);
    assert!(!h.sync.is_busy(&id));
}

#[tokio::test]
async fn test_rejected_rename_rolls_back() {
    let h = setup().await;
    let f1 = h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();
    h.remote.reject(&f1);

    let err = h.sync.rename_file(&real("f1"), "b.md").await.unwrap_err();
    assert!(matches!(err, SyncError::Rejected { .. }));
    assert_eq!(h.file_names(), vec!["a.md"]);
}

#[tokio::test]
async fn test_transient_failure_keeps_optimistic_rename() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();

    h.remote.offline.store(true, Ordering::SeqCst);
    let err = h.sync.rename_file(&real("f1"), "b.md").await.unwrap_err();
    assert!(matches!(err, SyncError::Remote(_)));
    assert_eq!(h.file_names(), vec!["b.md"]);

    h.remote.offline.store(false, Ordering::SeqCst);
    h.sync.refresh().await.unwrap();
    assert_eq!(h.file_names(), vec!["a.md"]);
}

#[tokio::test]
async fn test_rename_onto_existing_path_is_refused() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "a");
    h.remote.seed("f2", "b.md", "b");
    h.sync.refresh().await.unwrap();

    let err = h.sync.rename_file(&real("f1"), "b.md").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTarget(_)));
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn test_rejected_delete_restores_node() {
    let h = setup().await;
    let f1 = h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();
    h.remote.reject(&f1);

    assert!(h.sync.delete_file(&real("f1")).await.is_err());
    assert_eq!(h.file_names(), vec!["a.md"]);
}

// ============================================================================
// Folder batches
// ============================================================================

#[tokio::test]
async fn test_folder_rename_keeps_every_file_busy() {
    let h = setup().await;
    for (id, name) in [("f1", "proj/a.md"), ("f2", "proj/b.md"), ("f3", "proj/sub/c.md")] {
        h.remote.seed(id, name, id);
    }
    h.remote.seed("f4", "other.md", "o");
    h.sync.refresh().await.unwrap();

    let plan = h.sync.plan_folder_rename(&folder("proj"), "work").unwrap();
    assert_eq!(plan.count(), 3);
    assert_eq!(plan.target, Some(path("work")));

    let gate = h.remote.gate("rename");
    let batch = {
        let sync = Arc::clone(&h.sync);
        let plan = plan.clone();
        tokio::spawn(async move { sync.rename_folder(&plan).await })
    };

    for step in 0..3 {
        h.remote.entered.notified().await;
        for id in ["f1", "f2", "f3"] {
            assert!(h.sync.is_busy(&real(id)), "{id} idle at step {step}");
        }
        assert!(!h.sync.is_busy(&real("f4")));
        if step == 0 {
            assert!(h.sync.is_busy(&folder("proj")));
        }
        gate.notify_one();
    }

    let report = batch.await.unwrap().unwrap();
    assert!(report.is_complete());
    assert_eq!(report.succeeded.len(), 3);
    for id in ["f1", "f2", "f3"] {
        assert!(!h.sync.is_busy(&real(id)));
    }
    assert_eq!(
        h.file_names(),
        vec!["work/a.md", "work/b.md", "work/sub/c.md", "other.md"]
    );
}

#[tokio::test]
async fn test_folder_rename_partial_failure() {
    let h = setup().await;
    h.remote.seed("f1", "proj/a.md", "a");
    let f2 = h.remote.seed("f2", "proj/b.md", "b");
    h.sync.refresh().await.unwrap();
    h.remote.reject(&f2);

    let plan = h.sync.plan_folder_rename(&folder("proj"), "work").unwrap();
    let report = h.sync.rename_folder(&plan).await.unwrap();

    assert_eq!(report.succeeded, vec![real("f1")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, real("f2"));
    assert_eq!(h.file_names(), vec!["work/a.md", "proj/b.md"]);
}

#[tokio::test]
async fn test_folder_plan_goes_stale() {
    let h = setup().await;
    h.remote.seed("f1", "proj/a.md", "a");
    h.sync.refresh().await.unwrap();

    let plan = h.sync.plan_folder_delete(&folder("proj")).unwrap();
    h.remote.fail_creates.store(true, Ordering::SeqCst);
    h.sync.create_file(path("proj/new.md"), text("n")).await.unwrap();
    h.sync.await_pending_creations().await;

    let err = h.sync.delete_folder(&plan).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidTarget(_)));
    assert_eq!(h.sync.files().len(), 2);
}

#[tokio::test]
async fn test_folder_delete_removes_files_and_cache() {
    let h = setup().await;
    h.remote.seed("f1", "proj/a.md", "a");
    h.remote.seed("f2", "proj/deep/b.md", "b");
    h.remote.seed("f3", "keep.md", "k");
    h.sync.refresh().await.unwrap();
    h.sync.open_file(&real("f1")).await.unwrap();

    let plan = h.sync.plan_folder_delete(&folder("proj")).unwrap();
    assert_eq!(plan.count(), 2);
    let report = h.sync.delete_folder(&plan).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(h.file_names(), vec!["keep.md"]);
    assert!(!h.sync.is_cached(&real("f1")).await);
    assert!(matches!(
        h.sync.plan_folder_delete(&folder("proj")),
        Err(SyncError::NotFound(_))
    ));
}

// ============================================================================
// Encryption and sharing
// ============================================================================

#[tokio::test]
async fn test_encrypt_then_decrypt() {
    let h = setup().await;
    let f1 = h.remote.seed("f1", "secret.md", "plain");
    h.sync.refresh().await.unwrap();
    let id = real("f1");

    h.sync.encrypt_file(&id, "pw").await.unwrap();
    assert_eq!(h.sync.open_file(&id).await.unwrap(), text("enc[pw]:plain"));
    assert_eq!(h.remote.content_of(&f1), Some(text("enc[pw]:plain")));
    assert!(!h.sync.is_modified(&id).await);

    let err = h.sync.decrypt_file(&id, "wrong").await.unwrap_err();
    assert!(matches!(err, SyncError::Encryption(CipherError::WrongPassword)));
    assert_eq!(h.sync.open_file(&id).await.unwrap(), text("enc[pw]:plain"));

    h.sync.decrypt_file(&id, "pw").await.unwrap();
    assert_eq!(h.sync.open_file(&id).await.unwrap(), text("plain"));
    assert_eq!(h.remote.content_of(&f1), Some(text("plain")));
}

#[tokio::test]
async fn test_publish_and_unpublish() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();
    let id = real("f1");

    assert!(!h.sync.is_shared(&id));
    h.sync.publish_file(&id).await.unwrap();
    assert!(h.sync.is_shared(&id));
    h.sync.unpublish_file(&id).await.unwrap();
    assert!(!h.sync.is_shared(&id));
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn test_restoring_tip_records_nothing() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "v1\n");
    h.sync.refresh().await.unwrap();
    let id = real("f1");
    h.sync.open_file(&id).await.unwrap();

    h.sync.save_content(&id, text("v1\nv2\n")).await.unwrap();
    assert!(h.sync.commit_history(&id).await.unwrap());
    h.sync.save_content(&id, text("v1\nv2\nv3\n")).await.unwrap();
    assert_eq!(h.sync.flush_history().await.unwrap(), 1);
    assert_eq!(h.sync.history_timeline(&id).await.unwrap().len(), 2);

    let restored = h.sync.restore_history(&id, Origin::Local, 1).await.unwrap();
    assert_eq!(restored, text("v1\nv2\nv3\n"));
    assert_eq!(h.sync.history_timeline(&id).await.unwrap().len(), 2);

    let restored = h.sync.restore_history(&id, Origin::Local, 0).await.unwrap();
    assert_eq!(restored, text("v1\nv2\n"));
    assert_eq!(h.sync.history_timeline(&id).await.unwrap().len(), 3);
    assert_eq!(h.content.get(&id).await.unwrap().unwrap().content, text("v1\nv2\n"));
}

#[tokio::test]
async fn test_fetched_versions_are_recorded_as_remote_history() {
    let h = setup().await;
    let f1 = h.remote.seed("f1", "a.md", "v1\n");
    h.sync.refresh().await.unwrap();
    let id = real("f1");
    h.sync.open_file(&id).await.unwrap();
    assert!(h.sync.history_timeline(&id).await.unwrap().is_empty());

    h.remote.update(&f1, |_, content| *content = text("v1\nv2\n"));
    h.sync.clear_cache().await.unwrap();
    assert_eq!(h.sync.open_file(&id).await.unwrap(), text("v1\nv2\n"));

    let timeline = h.sync.history_timeline(&id).await.unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].origin, Origin::Remote);
    assert_eq!(timeline[0].additions, 1);
    assert!(timeline[0].revision_id.is_none());
}

#[tokio::test]
async fn test_import_remote_history() {
    let h = setup().await;
    let f1 = h.remote.seed("f1", "a.md", "b");
    h.sync.refresh().await.unwrap();
    h.remote.revisions.lock().unwrap().insert(
        f1,
        vec![
            RemoteRevision {
                id: "r1".to_string(),
                modified_time: Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap(),
                content: "a\n".to_string(),
            },
            RemoteRevision {
                id: "r2".to_string(),
                modified_time: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
                content: "b\n".to_string(),
            },
        ],
    );

    assert_eq!(h.sync.import_remote_history(&real("f1")).await.unwrap(), 2);
    let timeline = h.sync.history_timeline(&real("f1")).await.unwrap();
    assert_eq!(timeline.len(), 2);
    assert!(timeline.iter().all(|row| row.origin == Origin::Remote));

    let restored = h
        .sync
        .restore_history(&real("f1"), Origin::Remote, 0)
        .await
        .unwrap();
    assert_eq!(restored, text("a\n"));
}

#[tokio::test]
async fn test_history_flusher_commits_on_shutdown() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "v1");
    h.sync.refresh().await.unwrap();
    let id = real("f1");
    h.sync.open_file(&id).await.unwrap();
    h.sync.save_content(&id, text("v2")).await.unwrap();

    let shutdown = tokio_util::sync::CancellationToken::new();
    let flusher = h
        .sync
        .spawn_history_flusher(std::time::Duration::from_secs(60), shutdown.clone());
    shutdown.cancel();
    flusher.await.unwrap();

    assert_eq!(h.sync.history_timeline(&id).await.unwrap().len(), 1);
}

// ============================================================================
// Startup and observers
// ============================================================================

#[tokio::test]
async fn test_load_cached_restores_unconfirmed_files_as_failed() {
    let h = setup().await;
    h.remote.seed("f1", "a.md", "a");
    h.sync.refresh().await.unwrap();

    let orphan = Identifier::temp(path("draft.md"));
    h.content
        .put(&CacheEntry::new(orphan.clone(), path("draft.md"), text("draft")))
        .await
        .unwrap();

    assert_eq!(h.sync.load_cached().await.unwrap(), 2);
    assert!(h.sync.files().contains_key(&real("f1")));
    assert!(h.sync.files().contains_key(&orphan));
    assert!(matches!(
        h.sync.creation_state(&orphan),
        Some(CreationState::Failed(_))
    ));
}

#[tokio::test]
async fn test_unsubscribe_stops_events() {
    let h = setup().await;
    let count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&count);
    let sub = h.sync.on_tree_changed(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.sync.refresh().await.unwrap();
    let seen = count.load(Ordering::SeqCst);
    assert!(seen > 0);

    assert!(h.sync.unsubscribe(sub));
    h.sync.refresh().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), seen);
}
