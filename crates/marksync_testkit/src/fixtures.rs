//! Test fixtures and processor helpers.
//!
//! Provides builders for inbound update records and a harness that wires a
//! tree, a processor and a mock commit queue together.

use marksync_engine::{
    ActivationRequest, ActivationResponse, ApplyReport, BookmarkSpecifics, BookmarkSyncProcessor,
    EntityData, MockCommitQueue, ModelTypeProcessor, ModelTypeState, ScheduleSave, SyncConfig,
    UpdateResponseData, BOOKMARKS_ROOT_ID, BOOKMARKS_ROOT_TAG, BOOKMARK_BAR_TAG, ROOT_PARENT_ID,
};
use marksync_model::{BookmarkModel, MemoryBookmarkModel, NodeId, PermanentFolder, SharedModel};
use marksync_storage::FileRecordStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Server id used for the bookmark bar.
pub const BOOKMARK_BAR_ID: &str = "bookmark_bar_id";

/// A valid URL for URL bookmarks.
pub const TEST_URL: &str = "http://www.url.com";

/// Describes one remote bookmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkInfo {
    /// Server id.
    pub server_id: String,
    /// Title.
    pub title: String,
    /// URL; `None` for folders.
    pub url: Option<String>,
    /// Server id of the parent.
    pub parent_id: String,
    /// Server tag, for permanent folders.
    pub server_tag: Option<String>,
}

impl BookmarkInfo {
    /// A URL bookmark.
    pub fn url(server_id: &str, title: &str, url: &str, parent_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            title: title.to_string(),
            url: Some(url.to_string()),
            parent_id: parent_id.to_string(),
            server_tag: None,
        }
    }

    /// A folder.
    pub fn folder(server_id: &str, title: &str, parent_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            title: title.to_string(),
            url: None,
            parent_id: parent_id.to_string(),
            server_tag: None,
        }
    }

    /// The bookmark bar, as the server sends it.
    pub fn bookmark_bar() -> Self {
        Self {
            server_id: BOOKMARK_BAR_ID.to_string(),
            title: String::new(),
            url: None,
            parent_id: BOOKMARKS_ROOT_ID.to_string(),
            server_tag: Some(BOOKMARK_BAR_TAG.to_string()),
        }
    }
}

/// Builds an update record at response version 0.
///
/// Permanent folders carry empty specifics, like the server sends them.
pub fn create_update_data(info: &BookmarkInfo) -> UpdateResponseData {
    let specifics = match &info.url {
        Some(url) => BookmarkSpecifics::url(info.title.clone(), url.clone()),
        None => BookmarkSpecifics::folder(info.title.clone()),
    };
    UpdateResponseData {
        entity: EntityData {
            id: info.server_id.clone(),
            parent_id: info.parent_id.clone(),
            server_defined_unique_tag: info.server_tag.clone(),
            is_folder: info.url.is_none(),
            specifics: Some(specifics),
            ..EntityData::default()
        },
        response_version: 0,
    }
}

/// Builds a deletion record.
pub fn create_tombstone(server_id: &str) -> UpdateResponseData {
    UpdateResponseData {
        entity: EntityData {
            id: server_id.to_string(),
            ..EntityData::default()
        },
        response_version: 0,
    }
}

/// Builds the record for the collection root.
pub fn create_root_update() -> UpdateResponseData {
    create_update_data(&BookmarkInfo {
        server_id: BOOKMARKS_ROOT_TAG.to_string(),
        title: String::new(),
        url: None,
        parent_id: ROOT_PARENT_ID.to_string(),
        server_tag: Some(BOOKMARKS_ROOT_TAG.to_string()),
    })
}

/// A tree, a processor and a mock commit queue.
pub struct SyncTestHarness {
    /// The local tree.
    pub model: SharedModel<MemoryBookmarkModel>,
    /// The processor under test.
    pub processor: BookmarkSyncProcessor<MemoryBookmarkModel>,
    /// Commit queue attached by [`connect`](Self::connect).
    pub queue: MockCommitQueue,
    saves: Arc<AtomicUsize>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl SyncTestHarness {
    /// A harness over an empty loaded tree, with empty metadata decoded.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Like [`new`](Self::new) with a custom configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_model(MemoryBookmarkModel::new(), config)
    }

    /// A harness over `model`, with empty metadata decoded.
    pub fn with_model(model: MemoryBookmarkModel, config: SyncConfig) -> Self {
        let harness = Self {
            model: Arc::new(Mutex::new(model)),
            processor: BookmarkSyncProcessor::new(config),
            queue: MockCommitQueue::new(),
            saves: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(Mutex::new(Vec::new())),
        };
        harness.decode(&[]);
        harness
    }

    /// A save callback that counts into this harness.
    pub fn schedule_save(&self) -> ScheduleSave {
        let saves = Arc::clone(&self.saves);
        Arc::new(move || {
            saves.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// Decodes `blob` into the harness processor.
    pub fn decode(&self, blob: &[u8]) {
        self.processor
            .decode_sync_metadata(blob, self.schedule_save(), Arc::clone(&self.model))
            .expect("Failed to decode sync metadata");
    }

    /// Creates a second processor over the same tree from `blob`.
    pub fn restart(&self, blob: &[u8]) -> BookmarkSyncProcessor<MemoryBookmarkModel> {
        let processor = BookmarkSyncProcessor::new(SyncConfig::default());
        processor
            .decode_sync_metadata(blob, Arc::new(|| {}), Arc::clone(&self.model))
            .expect("Failed to decode sync metadata");
        processor
    }

    /// Saves scheduled so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Resets the save counter.
    pub fn reset_save_count(&self) {
        self.saves.store(0, Ordering::SeqCst);
    }

    /// Errors delivered to the error handler of [`start`](Self::start).
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// Applies a batch with a default sync state.
    pub fn apply(&self, updates: Vec<UpdateResponseData>) -> ApplyReport {
        self.processor
            .on_update_received(ModelTypeState::default(), updates)
            .expect("Failed to apply update batch")
    }

    /// Starts sync and returns the channel handle.
    pub fn start(&self) -> Box<dyn ModelTypeProcessor> {
        let errors = Arc::clone(&self.errors);
        let slot = Arc::new(Mutex::new(None::<ActivationResponse>));
        let sink = Arc::clone(&slot);
        self.processor.on_sync_starting(
            ActivationRequest::new(move |e| errors.lock().push(e.to_string())),
            Box::new(move |response: ActivationResponse| *sink.lock() = Some(response)),
        );
        let response = slot.lock().take().expect("Processor was not ready to start");
        response.type_processor
    }

    /// Starts sync and attaches the mock queue; returns the handle.
    pub fn connect(&self) -> Box<dyn ModelTypeProcessor> {
        let handle = self.start();
        handle
            .connect_sync(Box::new(self.queue.clone()))
            .expect("Failed to connect");
        handle
    }

    /// The bookmark bar node.
    pub fn bookmark_bar(&self) -> NodeId {
        self.model.lock().permanent_node(PermanentFolder::BookmarkBar)
    }

    /// The node tracked under `sync_id`.
    pub fn node_for(&self, sync_id: &str) -> Option<NodeId> {
        self.processor
            .with_tracker(|tracker| {
                tracker
                    .get_entity_for_sync_id(sync_id)
                    .and_then(|entity| entity.node())
            })
            .flatten()
    }

    /// Titles of the children of `parent`, in order.
    pub fn child_titles(&self, parent: NodeId) -> Vec<String> {
        let model = self.model.lock();
        model
            .children(parent)
            .iter()
            .filter_map(|id| model.node(*id))
            .map(|node| node.title.clone())
            .collect()
    }

    /// Asserts that the tracker and the tree agree.
    ///
    /// Only tombstones lack a node, every tracked node exists, and every
    /// node below a tracked folder is tracked exactly once.
    pub fn assert_consistent(&self) {
        let model = self.model.lock();
        self.processor.with_tracker(|tracker| {
            let mut seen = std::collections::HashSet::new();
            for entity in tracker.entities() {
                assert_eq!(
                    entity.node().is_none(),
                    entity.is_tombstone(),
                    "node presence mismatch for {}",
                    entity.sync_id()
                );
                if let Some(node) = entity.node() {
                    assert!(model.node(node).is_some(), "{} tracks a missing node", entity.sync_id());
                    assert!(seen.insert(node), "{node} tracked twice");
                }
            }
            for id in model.nodes_preorder() {
                let Some(parent) = model.node(id).and_then(|node| node.parent) else {
                    continue;
                };
                if model.is_permanent_node(id) {
                    continue;
                }
                if tracker.get_entity_for_node(parent).is_some() {
                    assert!(
                        tracker.get_entity_for_node(id).is_some(),
                        "{id} below a tracked folder is untracked"
                    );
                }
            }
        });
    }
}

impl Default for SyncTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies the bookmark bar plus `bookmarks` and checks the result.
pub fn init_with_synced_bookmarks(harness: &SyncTestHarness, bookmarks: &[BookmarkInfo]) {
    let mut updates = vec![create_update_data(&BookmarkInfo::bookmark_bar())];
    updates.extend(bookmarks.iter().map(create_update_data));
    harness.apply(updates);
    assert_state(&harness.processor, &harness.model, bookmarks);
}

/// Asserts that the tracker holds exactly the bookmark bar plus
/// `bookmarks`, each with the expected title, URL and parent.
pub fn assert_state(
    processor: &BookmarkSyncProcessor<MemoryBookmarkModel>,
    model: &SharedModel<MemoryBookmarkModel>,
    bookmarks: &[BookmarkInfo],
) {
    let model = model.lock();
    processor
        .with_tracker(|tracker| {
            assert_eq!(tracker.tracked_entities_count(), bookmarks.len() + 1);
            for info in bookmarks {
                let entity = tracker
                    .get_entity_for_sync_id(&info.server_id)
                    .unwrap_or_else(|| panic!("{} is not tracked", info.server_id));
                let node = entity
                    .node()
                    .and_then(|id| model.node(id))
                    .unwrap_or_else(|| panic!("{} has no node", info.server_id));
                assert_eq!(node.title, info.title);
                assert_eq!(node.url, info.url);

                let parent = tracker
                    .get_entity_for_sync_id(&info.parent_id)
                    .and_then(|entity| entity.node());
                assert_eq!(node.parent, parent);
            }
        })
        .expect("Processor has no tracker");
}

/// A file-backed record store in a temporary directory.
pub struct TestStore {
    /// The store.
    pub store: Arc<FileRecordStore>,
    dir: TempDir,
}

impl TestStore {
    /// Opens a fresh store.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileRecordStore::open_with_create_dirs(&dir.path().join("records.log"))
            .expect("Failed to open record store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    /// Reopens the store from disk.
    pub fn reopen(&self) -> Arc<FileRecordStore> {
        Arc::new(
            FileRecordStore::open(&self.dir.path().join("records.log")).expect("Failed to reopen record store"),
        )
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}
