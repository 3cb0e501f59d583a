//! Sync lifecycle controller.
//!
//! [`BookmarkSyncProcessor`] owns the tracker, persists and restores sync
//! metadata, and hands a [`ProcessorHandle`] to the commit queue once the
//! tree is loaded and sync was asked to start.
//!
//! ```text
//! Unloaded ──tree loaded──▶ TreeReady ──metadata──▶ Tracking ◀──▶ Connected
//!                               │                      ▲
//!                               └──no metadata──▶ AwaitingFirstSync
//!                                                 (first batch)
//! ```
//!
//! # Locking
//!
//! Entry points take the processor lock, then the tree lock, then the
//! tracker lock. Callers must not hold the tree lock while calling into
//! the processor, and callbacks run after every lock is released.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::metadata::{BookmarkMetadata, BookmarkModelMetadata, EntityMetadata};
use crate::observer::{adopt_untracked_nodes, LocalChangeObserver, SharedCommitQueue, SharedTracker};
use crate::reconciler::{ApplyReport, UpdateReconciler};
use crate::sequence::SequenceChecker;
use crate::stats::{StatusCounters, SyncStats, SyncStatsSnapshot};
use crate::tracker::SyncedBookmarkTracker;
use crate::transport::{
    ActivationRequest, ActivationResponse, CommitQueue, ErrorHandler, MetadataFate,
    ModelTypeProcessor, StartCallback,
};
use crate::types::{
    tag_for_permanent_folder, BookmarkSpecifics, CommitRequestData, CommitResponseData,
    EntityData, ModelTypeState, UpdateResponseData,
};
use marksync_model::{BookmarkModel, NodeId, ObserverId, SharedModel};
use marksync_storage::{MetadataChangeList, Record, RecordStore, WriteBatch};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};

/// Asks the host to persist the tree together with the sync metadata.
pub type ScheduleSave = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Waiting for the tree to load.
    Unloaded,
    /// The tree is loaded and metadata is being decoded.
    TreeReady,
    /// No usable metadata; the first update batch performs the initial merge.
    AwaitingFirstSync,
    /// The tracker is populated and local edits are observed.
    Tracking,
    /// Tracking, with a commit queue attached.
    Connected,
    /// The tree never loaded; only metadata decoding is safe.
    Stalled,
}

impl ProcessorState {
    /// Returns true if inbound batches can be applied.
    pub fn can_receive_updates(&self) -> bool {
        matches!(
            self,
            ProcessorState::AwaitingFirstSync | ProcessorState::Tracking | ProcessorState::Connected
        )
    }

    /// Returns true if a tracker exists.
    pub fn is_tracking(&self) -> bool {
        matches!(self, ProcessorState::Tracking | ProcessorState::Connected)
    }
}

/// One tree node as reported for debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugNode {
    /// Local node id.
    pub node: NodeId,
    /// Server id, if tracked.
    pub sync_id: Option<String>,
    /// Server id of the parent, if tracked.
    pub parent_sync_id: Option<String>,
    /// Display title.
    pub title: String,
    /// URL for URL nodes.
    pub url: Option<String>,
    /// Whether the node is a folder.
    pub is_folder: bool,
    /// Sync bookkeeping, if tracked.
    pub metadata: Option<EntityMetadata>,
}

type Inner<M> = Arc<Mutex<Option<ProcessorCore<M>>>>;

/// Work that must run after the processor lock is released.
#[derive(Default)]
struct Effects {
    error_handler: Option<ErrorHandler>,
    schedule_save: Option<ScheduleSave>,
    saves: usize,
    start: Option<(StartCallback, ActivationResponse)>,
}

impl Effects {
    fn run(self, error: Option<&SyncError>) {
        if let (Some(error), Some(handler)) = (error, self.error_handler.as_ref()) {
            if error.is_model_error() {
                handler(error);
            }
        }
        if let Some(save) = self.schedule_save.as_ref() {
            for _ in 0..self.saves {
                save();
            }
        }
        if let Some((callback, response)) = self.start {
            callback(response);
        }
    }
}

struct ProcessorCore<M: BookmarkModel + 'static> {
    this: Weak<Mutex<Option<ProcessorCore<M>>>>,
    config: SyncConfig,
    phase: ProcessorState,
    model: Option<SharedModel<M>>,
    schedule_save: Option<ScheduleSave>,
    pending_metadata: Option<BookmarkModelMetadata>,
    tracker: SharedTracker,
    commit_queue: SharedCommitQueue,
    observer: Arc<LocalChangeObserver>,
    observer_id: Option<ObserverId>,
    error_handler: Option<ErrorHandler>,
    start_callback: Option<StartCallback>,
    store: Option<Arc<dyn RecordStore>>,
    deferred: Vec<UpdateResponseData>,
    epoch: u64,
    stats: Arc<SyncStats>,
    sequence: SequenceChecker,
}

/// The bookmark sync processor.
///
/// # Example
///
/// ```rust
/// use marksync_engine::{BookmarkSyncProcessor, ProcessorState, SyncConfig};
/// use marksync_model::MemoryBookmarkModel;
/// use parking_lot::Mutex;
/// use std::sync::Arc;
///
/// let model = Arc::new(Mutex::new(MemoryBookmarkModel::new()));
/// let processor = BookmarkSyncProcessor::new(SyncConfig::default());
/// processor.decode_sync_metadata(&[], Arc::new(|| {}), model).unwrap();
/// assert_eq!(processor.state(), ProcessorState::AwaitingFirstSync);
/// ```
pub struct BookmarkSyncProcessor<M: BookmarkModel + 'static> {
    inner: Inner<M>,
    stats: Arc<SyncStats>,
}

impl<M: BookmarkModel + 'static> fmt::Debug for BookmarkSyncProcessor<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookmarkSyncProcessor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<M: BookmarkModel + 'static> BookmarkSyncProcessor<M> {
    /// Creates a processor bound to the current thread.
    pub fn new(config: SyncConfig) -> Self {
        let stats = Arc::new(SyncStats::new());
        let tracker: SharedTracker = Arc::new(Mutex::new(None));
        let commit_queue: SharedCommitQueue = Arc::new(Mutex::new(None));
        let observer = Arc::new(LocalChangeObserver::new(
            Arc::clone(&tracker),
            Arc::clone(&commit_queue),
        ));

        let core_stats = Arc::clone(&stats);
        let inner = Arc::new_cyclic(|this| {
            Mutex::new(Some(ProcessorCore {
                this: this.clone(),
                config,
                phase: ProcessorState::Unloaded,
                model: None,
                schedule_save: None,
                pending_metadata: None,
                tracker,
                commit_queue,
                observer,
                observer_id: None,
                error_handler: None,
                start_callback: None,
                store: None,
                deferred: Vec::new(),
                epoch: 0,
                stats: core_stats,
                sequence: SequenceChecker::new(),
            }))
        });

        Self { inner, stats }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        self.inner
            .lock()
            .as_ref()
            .map_or(ProcessorState::Unloaded, ProcessorCore::state)
    }

    /// Running counters.
    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs `f` against the tracker, if one exists.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&SyncedBookmarkTracker) -> R) -> Option<R> {
        let guard = self.inner.lock();
        let core = guard.as_ref()?;
        let tracker = core.tracker.lock();
        tracker.as_ref().map(f)
    }

    /// Restores sync state from a metadata blob.
    ///
    /// `schedule_save` is invoked whenever sync metadata changes without a
    /// tree mutation. If the tree is still loading, the blob is kept until
    /// [`on_model_loaded`](Self::on_model_loaded). A blob that fails to
    /// decode is logged and treated as absent.
    ///
    /// # Errors
    ///
    /// Fails if the tree cannot be observed.
    pub fn decode_sync_metadata(
        &self,
        metadata: &[u8],
        schedule_save: ScheduleSave,
        model: SharedModel<M>,
    ) -> SyncResult<()> {
        let decoded = BookmarkModelMetadata::from_bytes(metadata).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to decode sync metadata; starting from scratch");
            BookmarkModelMetadata::default()
        });
        self.run(None, |core, effects| {
            core.reset_tracking();
            core.model = Some(Arc::clone(&model));
            core.schedule_save = Some(schedule_save);

            if !model.lock().is_loaded() {
                tracing::debug!("bookmark model not loaded yet; deferring sync metadata");
                core.pending_metadata = Some(decoded);
                core.set_phase(ProcessorState::Unloaded);
                return Ok(());
            }
            core.load_metadata(decoded, effects)
        })
    }

    /// Signals that the tree finished loading.
    ///
    /// # Errors
    ///
    /// Fails if no tree was supplied through
    /// [`decode_sync_metadata`](Self::decode_sync_metadata).
    pub fn on_model_loaded(&self) -> SyncResult<()> {
        self.run(None, |core, effects| {
            if core.model.is_none() {
                return Err(SyncError::invalid_state("no bookmark model supplied"));
            }
            if core.phase != ProcessorState::Unloaded {
                return Ok(());
            }
            let metadata = core.pending_metadata.take().unwrap_or_default();
            core.load_metadata(metadata, effects)
        })
    }

    /// Signals that the tree will never load.
    pub fn on_model_load_failed(&self) {
        let _ = self.run(None, |core, _| {
            tracing::error!("bookmark model failed to load; sync stalled");
            core.pending_metadata = None;
            core.set_phase(ProcessorState::Stalled);
            Ok(())
        });
    }

    /// Serializes the tracker and the global sync state.
    ///
    /// # Errors
    ///
    /// Fails if encoding fails.
    pub fn encode_sync_metadata(&self) -> SyncResult<Vec<u8>> {
        self.run(None, |core, _| core.build_metadata()?.to_bytes())
    }

    /// Asks for sync to start. `callback` receives the channel handle as
    /// soon as the tree is loaded and the metadata decoded.
    pub fn on_sync_starting(&self, request: ActivationRequest, callback: StartCallback) {
        let _ = self.run(None, |core, effects| {
            tracing::info!("sync is starting for bookmarks");
            core.error_handler = Some(request.error_handler);
            core.start_callback = Some(callback);
            core.connect_if_ready(effects);
            Ok(())
        });
    }

    /// Stops sync. Every handle issued so far is invalidated.
    ///
    /// # Errors
    ///
    /// Fails if clearing the record store fails.
    pub fn on_sync_stopping(&self, fate: MetadataFate) -> SyncResult<()> {
        self.run(None, |core, effects| core.stop(fate, effects))
    }

    /// Attaches the commit queue.
    ///
    /// # Errors
    ///
    /// Never fails on the processor itself; see [`ProcessorHandle`].
    pub fn connect_sync(&self, queue: Box<dyn CommitQueue>) -> SyncResult<()> {
        self.run(None, |core, _| {
            core.connect(queue);
            Ok(())
        })
    }

    /// Detaches the commit queue.
    ///
    /// # Errors
    ///
    /// Never fails on the processor itself; see [`ProcessorHandle`].
    pub fn disconnect_sync(&self) -> SyncResult<()> {
        self.run(None, |core, _| {
            core.disconnect();
            Ok(())
        })
    }

    /// Applies an inbound update batch.
    ///
    /// # Errors
    ///
    /// Fails before the tree loaded or if persisting to the record store
    /// fails. Dropped records are listed in the report, not returned as
    /// errors.
    pub fn on_update_received(
        &self,
        state: ModelTypeState,
        updates: Vec<UpdateResponseData>,
    ) -> SyncResult<ApplyReport> {
        self.run(None, |core, effects| core.on_update_received(state, &updates, effects))
    }

    /// Returns up to `max_entries` unsynced entities, 0 meaning the
    /// configured default.
    ///
    /// # Errors
    ///
    /// Fails if no tree was supplied.
    pub fn get_local_changes(&self, max_entries: usize) -> SyncResult<Vec<CommitRequestData>> {
        self.run(None, |core, _| core.get_local_changes(max_entries))
    }

    /// Applies the server's answer to a commit.
    ///
    /// # Errors
    ///
    /// Fails before the first sync or if persisting fails.
    pub fn on_commit_completed(
        &self,
        state: ModelTypeState,
        responses: Vec<CommitResponseData>,
    ) -> SyncResult<()> {
        self.run(None, |core, effects| core.on_commit_completed(state, &responses, effects))
    }

    /// Attaches a record store. Every tracked entity is written once, and
    /// later changes follow after each batch and commit.
    ///
    /// # Errors
    ///
    /// Fails if the initial write fails.
    pub fn attach_store(&self, store: Arc<dyn RecordStore>) -> SyncResult<()> {
        self.run(None, |core, _| {
            core.store = Some(store);
            if let Some(tracker) = core.tracker.lock().as_mut() {
                tracker.mark_all_dirty();
            }
            core.persist()
        })
    }

    /// Rebuilds sync state from the attached record store.
    ///
    /// # Errors
    ///
    /// Fails without a store or tree, or if stored records do not decode.
    pub fn restore_from_store(&self) -> SyncResult<()> {
        self.run(None, |core, effects| {
            let store = core.store.clone().ok_or(SyncError::NoStore)?;
            let model = core.model()?;
            if !model.lock().is_loaded() {
                return Err(SyncError::invalid_state("bookmark model not loaded"));
            }

            let batch = store.read_all_metadata()?;
            let model_type_state = batch
                .global_state
                .as_deref()
                .map(decode_cbor::<ModelTypeState>)
                .transpose()?
                .unwrap_or_default();
            let bookmarks_metadata = batch
                .entities
                .values()
                .map(|bytes| decode_cbor::<BookmarkMetadata>(bytes))
                .collect::<SyncResult<Vec<_>>>()?;

            core.reset_tracking();
            core.load_metadata(
                BookmarkModelMetadata {
                    model_type_state,
                    bookmarks_metadata,
                    ..BookmarkModelMetadata::default()
                },
                effects,
            )
        })
    }

    /// Reports every tree node with its sync state, in pre-order.
    ///
    /// # Errors
    ///
    /// Fails if no tree was supplied.
    pub fn get_all_nodes_for_debugging(
        &self,
        callback: impl FnOnce(Vec<DebugNode>),
    ) -> SyncResult<()> {
        let nodes = self.run(None, |core, _| core.debug_nodes())?;
        callback(nodes);
        Ok(())
    }

    /// Reports entity counts.
    pub fn get_status_counters_for_debugging(&self, callback: impl FnOnce(StatusCounters)) {
        let counters = self
            .with_tracker(|tracker| StatusCounters {
                entities: tracker.tracked_entities_count(),
                tombstones: tracker.tombstone_count(),
                unsynced: tracker.unsynced_count(),
            })
            .unwrap_or_default();
        callback(counters);
    }

    /// Reads stored payloads by server id.
    ///
    /// # Errors
    ///
    /// Fails without a store or if the read fails.
    pub fn get_data_for_debugging(
        &self,
        ids: &[String],
        callback: impl FnOnce(Vec<Record>),
    ) -> SyncResult<()> {
        let records = self.run(None, |core, _| {
            let store = core.store.as_ref().ok_or(SyncError::NoStore)?;
            Ok(store.read_data(ids)?)
        })?;
        callback(records);
        Ok(())
    }

    fn run<R>(
        &self,
        epoch: Option<u64>,
        op: impl FnOnce(&mut ProcessorCore<M>, &mut Effects) -> SyncResult<R>,
    ) -> SyncResult<R> {
        run(&self.inner, epoch, op)
    }
}

impl<M: BookmarkModel + 'static> Drop for BookmarkSyncProcessor<M> {
    fn drop(&mut self) {
        let core = self.inner.lock().take();
        if let Some(mut core) = core {
            core.unregister_observer();
            *core.commit_queue.lock() = None;
            tracing::debug!("bookmark sync processor destroyed; handles invalidated");
        }
    }
}

fn run<M: BookmarkModel + 'static, R>(
    inner: &Inner<M>,
    epoch: Option<u64>,
    op: impl FnOnce(&mut ProcessorCore<M>, &mut Effects) -> SyncResult<R>,
) -> SyncResult<R> {
    let mut effects = Effects::default();
    let result = {
        let mut guard = inner.lock();
        let core = guard.as_mut().ok_or(SyncError::HandleInvalidated)?;
        if epoch.is_some_and(|epoch| epoch != core.epoch) {
            return Err(SyncError::HandleInvalidated);
        }
        debug_assert!(core.sequence.is_current(), "processor called off its sequence");

        effects.error_handler = core.error_handler.clone();
        let result = op(core, &mut effects);
        effects.schedule_save = core.schedule_save.clone();
        if let Err(e) = &result {
            if e.is_model_error() {
                tracing::error!(error = %e, "bookmark sync model error");
                core.stats.record_error();
            }
        }
        result
    };
    effects.run(result.as_ref().err());
    result
}

impl<M: BookmarkModel + 'static> ProcessorCore<M> {
    fn state(&self) -> ProcessorState {
        if self.phase == ProcessorState::Tracking && self.commit_queue.lock().is_some() {
            ProcessorState::Connected
        } else {
            self.phase
        }
    }

    fn set_phase(&mut self, phase: ProcessorState) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "bookmark sync state change");
            self.phase = phase;
        }
    }

    fn model(&self) -> SyncResult<SharedModel<M>> {
        self.model
            .clone()
            .ok_or_else(|| SyncError::invalid_state("no bookmark model supplied"))
    }

    fn load_metadata(
        &mut self,
        metadata: BookmarkModelMetadata,
        effects: &mut Effects,
    ) -> SyncResult<()> {
        self.set_phase(ProcessorState::TreeReady);
        let model = self.model()?;

        if !metadata.model_type_state.initial_sync_done {
            if !metadata.bookmarks_metadata.is_empty() {
                tracing::error!(
                    entries = metadata.bookmarks_metadata.len(),
                    "persisted sync metadata present while initial sync is not done"
                );
            }
            self.set_phase(ProcessorState::AwaitingFirstSync);
            self.connect_if_ready(effects);
            return Ok(());
        }

        for issue in metadata.validate() {
            tracing::warn!(%issue, "inconsistent sync metadata");
        }

        let mut model = model.lock();
        let mut entries = Vec::with_capacity(metadata.bookmarks_metadata.len());
        for record in metadata.bookmarks_metadata {
            let server_id = &record.metadata.server_id;
            match (record.metadata.is_deleted, record.id) {
                (true, Some(_)) => {
                    tracing::error!(%server_id, "tombstones shouldn't have a bookmark id");
                }
                (true, None) => entries.push((None, record.metadata)),
                (false, None) => {
                    tracing::error!(%server_id, "bookmark id missing from sync metadata");
                }
                (false, Some(node)) if model.node(node).is_none() => {
                    tracing::error!(%server_id, %node, "cannot find the bookmark node for sync metadata");
                }
                (false, Some(node)) => entries.push((Some(node), record.metadata)),
            }
        }

        let mut tracker = SyncedBookmarkTracker::from_metadata(entries, metadata.model_type_state);
        let adopted = adopt_untracked_nodes(&*model, &mut tracker);
        let tracked = tracker.tracked_entities_count();
        *self.tracker.lock() = Some(tracker);
        if self.observer_id.is_none() {
            self.observer_id = Some(model.add_observer(self.observer.clone()));
        }
        drop(model);

        tracing::info!(tracked, adopted, "bookmark sync metadata loaded");
        if adopted > 0 {
            effects.saves += 1;
        }
        self.set_phase(ProcessorState::Tracking);
        self.connect_if_ready(effects);
        Ok(())
    }

    fn build_metadata(&self) -> SyncResult<BookmarkModelMetadata> {
        let tracker = self.tracker.lock();
        let Some(tracker) = tracker.as_ref() else {
            return Ok(BookmarkModelMetadata::default());
        };
        let preorder = match &self.model {
            Some(model) => model.lock().nodes_preorder(),
            None => Vec::new(),
        };
        Ok(tracker.build_bookmark_model_metadata(&preorder))
    }

    fn connect_if_ready(&mut self, effects: &mut Effects) {
        if self.start_callback.is_none() {
            return;
        }
        if !matches!(
            self.phase,
            ProcessorState::AwaitingFirstSync | ProcessorState::Tracking
        ) {
            return;
        }
        let Some(inner) = self.this.upgrade() else {
            return;
        };
        let Some(callback) = self.start_callback.take() else {
            return;
        };

        let model_type_state = self
            .tracker
            .lock()
            .as_ref()
            .map(|tracker| tracker.model_type_state().clone())
            .unwrap_or_default();
        let handle = ProcessorHandle {
            inner,
            epoch: self.epoch,
        };
        tracing::debug!(epoch = self.epoch, "bookmark sync ready to connect");
        effects.start = Some((
            callback,
            ActivationResponse {
                model_type_state,
                type_processor: Box::new(handle),
            },
        ));
    }

    fn connect(&mut self, queue: Box<dyn CommitQueue>) {
        tracing::debug!("commit queue connected");
        let has_local_changes = self
            .tracker
            .lock()
            .as_ref()
            .is_some_and(SyncedBookmarkTracker::has_local_changes);
        let mut slot = self.commit_queue.lock();
        let queue = slot.insert(queue);
        if has_local_changes {
            queue.nudge_for_commit();
        }
    }

    fn disconnect(&mut self) {
        tracing::debug!("commit queue disconnected");
        *self.commit_queue.lock() = None;
    }

    fn stop(&mut self, fate: MetadataFate, effects: &mut Effects) -> SyncResult<()> {
        tracing::info!(?fate, "sync is stopping for bookmarks");
        self.epoch += 1;
        self.start_callback = None;
        self.error_handler = None;
        self.disconnect();

        if fate == MetadataFate::KeepMetadata {
            return Ok(());
        }

        self.reset_tracking();
        if self.phase != ProcessorState::Unloaded && self.phase != ProcessorState::Stalled {
            self.set_phase(ProcessorState::AwaitingFirstSync);
        }
        effects.saves += 1;
        self.clear_store()
    }

    fn reset_tracking(&mut self) {
        self.unregister_observer();
        *self.tracker.lock() = None;
        self.deferred.clear();
        self.pending_metadata = None;
    }

    fn unregister_observer(&mut self) {
        if let (Some(id), Some(model)) = (self.observer_id.take(), self.model.as_ref()) {
            model.lock().remove_observer(id);
        }
    }

    fn clear_store(&self) -> SyncResult<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        let metadata = store.read_all_metadata()?;
        let data = store.read_all_data()?;

        let mut changes = MetadataChangeList::new();
        for id in metadata.entities.keys() {
            changes.clear_metadata(id.clone());
        }
        changes.clear_global_state();

        let mut batch = store.create_write_batch();
        for record in data {
            batch.delete_data(record.id);
        }
        batch.take_metadata_changes(changes);
        store.commit_write_batch(batch)?;
        Ok(())
    }

    fn on_update_received(
        &mut self,
        state: ModelTypeState,
        updates: &[UpdateResponseData],
        effects: &mut Effects,
    ) -> SyncResult<ApplyReport> {
        if !self.phase.can_receive_updates() {
            return Err(SyncError::invalid_state(format!(
                "cannot apply updates while {:?}",
                self.phase
            )));
        }
        let model = self.model()?;
        let mut model = model.lock();
        let mut tracker_guard = self.tracker.lock();

        let initial = tracker_guard.is_none();
        if initial {
            tracing::info!(updates = updates.len(), "applying initial bookmark sync");
        }
        let tracker =
            tracker_guard.get_or_insert_with(|| SyncedBookmarkTracker::new(state.clone()));

        let report = UpdateReconciler::new(&mut *model, tracker, &self.config, Some(self.observer.as_ref()))
            .with_initial_merge(initial)
            .apply_batch(updates, &mut self.deferred);

        tracker.set_model_type_state(ModelTypeState {
            initial_sync_done: true,
            ..state
        });
        if initial {
            if adopt_untracked_nodes(&*model, tracker) > 0 {
                effects.saves += 1;
            }
            if self.observer_id.is_none() {
                self.observer_id = Some(model.add_observer(self.observer.clone()));
            }
        }

        let persisted = persist_changes(self.store.as_deref(), tracker, &*model);
        let has_local_changes = tracker.has_local_changes();
        drop(tracker_guard);
        drop(model);

        tracing::debug!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            dropped = report.dropped.len(),
            "applied bookmark update batch"
        );
        self.set_phase(ProcessorState::Tracking);
        self.stats.record_batch(&report);
        effects.saves += report.save_requests;
        if has_local_changes {
            if let Some(queue) = self.commit_queue.lock().as_ref() {
                queue.nudge_for_commit();
            }
        }

        persisted?;
        Ok(report)
    }

    fn get_local_changes(&self, max_entries: usize) -> SyncResult<Vec<CommitRequestData>> {
        let limit = if max_entries == 0 {
            self.config.max_commit_batch
        } else {
            max_entries
        };
        let model = self.model()?;
        let model = model.lock();
        let tracker = self.tracker.lock();
        let Some(tracker) = tracker.as_ref() else {
            return Ok(Vec::new());
        };

        let mut requests = Vec::new();
        for node_id in model.nodes_preorder() {
            if requests.len() >= limit {
                break;
            }
            let (Some(entity), Some(node)) = (tracker.get_entity_for_node(node_id), model.node(node_id))
            else {
                continue;
            };
            if !entity.is_unsynced() {
                continue;
            }
            let specifics = BookmarkSpecifics::from_node(node);
            let metadata = entity.metadata();
            requests.push(CommitRequestData {
                entity: EntityData {
                    id: entity.sync_id().to_string(),
                    parent_id: node
                        .parent
                        .and_then(|parent| tracker.sync_id_for_node(parent))
                        .unwrap_or_default()
                        .to_string(),
                    server_defined_unique_tag: node
                        .permanent
                        .map(|folder| tag_for_permanent_folder(folder).to_string()),
                    is_folder: node.is_folder(),
                    creation_time: metadata.creation_time,
                    modification_time: metadata.modification_time,
                    specifics: Some(specifics.clone()),
                },
                sequence_number: metadata.sequence_number,
                base_version: metadata.server_version,
                specifics_hash: specifics.hash(),
            });
        }

        let mut tombstones: Vec<_> = tracker
            .entities()
            .filter(|entity| entity.is_tombstone() && entity.is_unsynced())
            .collect();
        tombstones.sort_by(|a, b| a.sync_id().cmp(b.sync_id()));
        for entity in tombstones {
            if requests.len() >= limit {
                break;
            }
            let metadata = entity.metadata();
            requests.push(CommitRequestData {
                entity: EntityData {
                    id: entity.sync_id().to_string(),
                    creation_time: metadata.creation_time,
                    modification_time: metadata.modification_time,
                    ..EntityData::default()
                },
                sequence_number: metadata.sequence_number,
                base_version: metadata.server_version,
                specifics_hash: Vec::new(),
            });
        }

        self.stats.record_commit_requests(requests.len());
        Ok(requests)
    }

    fn on_commit_completed(
        &mut self,
        state: ModelTypeState,
        responses: &[CommitResponseData],
        effects: &mut Effects,
    ) -> SyncResult<()> {
        let model = self.model()?;
        let model = model.lock();
        let mut tracker_guard = self.tracker.lock();
        let Some(tracker) = tracker_guard.as_mut() else {
            return Err(SyncError::invalid_state("commit completed before the first sync"));
        };

        for response in responses {
            let known = if tracker.get_entity_for_sync_id(&response.client_id).is_some() {
                response.client_id.as_str()
            } else if tracker.get_entity_for_sync_id(&response.id).is_some() {
                response.id.as_str()
            } else {
                tracing::warn!(id = %response.id, "commit response for an untracked entity");
                continue;
            };

            tracker.update_upon_commit_response(known, response.response_version, response.sequence_number);
            let Some(entity) = tracker.get_entity_for_sync_id(known) else {
                continue;
            };
            let node = entity.node().filter(|_| !entity.is_unsynced());

            let mut current = known;
            if known != response.id {
                if tracker.get_entity_for_sync_id(&response.id).is_some() {
                    tracing::error!(client_id = %known, id = %response.id, "server id already tracked");
                } else {
                    tracker.update_sync_id(known, &response.id);
                    current = response.id.as_str();
                }
            }

            if let Some(node) = node.and_then(|id| model.node(id)) {
                tracker.update_specifics_hash(current, &BookmarkSpecifics::from_node(node));
            }
        }

        tracker.set_model_type_state(ModelTypeState {
            initial_sync_done: true,
            ..state
        });
        let persisted = persist_changes(self.store.as_deref(), tracker, &*model);
        drop(tracker_guard);
        drop(model);

        self.stats.record_commit_completed();
        effects.saves += 1;
        persisted
    }

    fn persist(&self) -> SyncResult<()> {
        let Some(model) = self.model.as_ref() else {
            return Ok(());
        };
        let model = model.lock();
        let mut tracker = self.tracker.lock();
        match tracker.as_mut() {
            Some(tracker) => persist_changes(self.store.as_deref(), tracker, &*model),
            None => Ok(()),
        }
    }

    fn debug_nodes(&self) -> SyncResult<Vec<DebugNode>> {
        let model = self.model()?;
        let model = model.lock();
        let tracker = self.tracker.lock();
        let tracker = tracker.as_ref();

        let sync_id = |id: NodeId| tracker.and_then(|t| t.sync_id_for_node(id)).map(str::to_string);
        let nodes = model
            .nodes_preorder()
            .into_iter()
            .filter_map(|id| model.node(id))
            .filter(|node| node.parent.is_some())
            .map(|node| DebugNode {
                node: node.id,
                sync_id: sync_id(node.id),
                parent_sync_id: node.parent.and_then(|parent| sync_id(parent)),
                title: node.title.clone(),
                url: node.url.clone(),
                is_folder: node.is_folder(),
                metadata: tracker
                    .and_then(|t| t.get_entity_for_node(node.id))
                    .map(|entity| entity.metadata().clone()),
            })
            .collect();
        Ok(nodes)
    }
}

/// Writes the tracker's pending changes to `store` in one batch.
///
/// Without a store the pending set is discarded. On failure it is kept for
/// the next attempt.
fn persist_changes<M: BookmarkModel + ?Sized>(
    store: Option<&dyn RecordStore>,
    tracker: &mut SyncedBookmarkTracker,
    model: &M,
) -> SyncResult<()> {
    let (dirty, removed) = tracker.take_pending_writes();
    let Some(store) = store else {
        return Ok(());
    };

    let result = build_write_batch(store, tracker, model, &dirty, &removed)
        .and_then(|batch| Ok(store.commit_write_batch(batch)?));
    if let Err(e) = &result {
        tracing::error!(error = %e, dirty = dirty.len(), removed = removed.len(), "failed to persist sync metadata");
        tracker.restore_pending_writes(dirty, removed);
    }
    result
}

fn build_write_batch<M: BookmarkModel + ?Sized>(
    store: &dyn RecordStore,
    tracker: &SyncedBookmarkTracker,
    model: &M,
    dirty: &[String],
    removed: &[String],
) -> SyncResult<WriteBatch> {
    let mut batch = store.create_write_batch();
    let mut changes = MetadataChangeList::new();

    for id in dirty {
        let Some(entity) = tracker.get_entity_for_sync_id(id) else {
            continue;
        };
        let record = BookmarkMetadata {
            id: entity.node(),
            metadata: entity.metadata().clone(),
        };
        changes.update_metadata(id.clone(), encode_cbor(&record)?);
        match entity.node().and_then(|node| model.node(node)) {
            Some(node) => batch.write_data(id.clone(), encode_cbor(&BookmarkSpecifics::from_node(node))?),
            None => batch.delete_data(id.clone()),
        }
    }
    for id in removed {
        changes.clear_metadata(id.clone());
        batch.delete_data(id.clone());
    }
    changes.update_global_state(encode_cbor(tracker.model_type_state())?);

    batch.take_metadata_changes(changes);
    Ok(batch)
}

fn encode_cbor<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(SyncError::metadata)?;
    Ok(bytes)
}

fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> SyncResult<T> {
    ciborium::from_reader(bytes).map_err(SyncError::metadata)
}

/// The channel handle given to the commit queue.
///
/// A handle is tied to one start of sync. It is invalidated synchronously
/// when sync stops or the processor is dropped; every call afterwards
/// returns [`SyncError::HandleInvalidated`].
pub struct ProcessorHandle<M: BookmarkModel + 'static> {
    inner: Inner<M>,
    epoch: u64,
}

impl<M: BookmarkModel + 'static> ProcessorHandle<M> {
    /// Returns true while the handle can still reach its processor.
    pub fn is_valid(&self) -> bool {
        self.inner
            .lock()
            .as_ref()
            .is_some_and(|core| core.epoch == self.epoch)
    }

    fn run<R>(
        &self,
        op: impl FnOnce(&mut ProcessorCore<M>, &mut Effects) -> SyncResult<R>,
    ) -> SyncResult<R> {
        run(&self.inner, Some(self.epoch), op)
    }
}

impl<M: BookmarkModel + 'static> fmt::Debug for ProcessorHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("epoch", &self.epoch)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl<M: BookmarkModel + 'static> ModelTypeProcessor for ProcessorHandle<M> {
    fn connect_sync(&self, queue: Box<dyn CommitQueue>) -> SyncResult<()> {
        self.run(|core, _| {
            core.connect(queue);
            Ok(())
        })
    }

    fn disconnect_sync(&self) -> SyncResult<()> {
        self.run(|core, _| {
            core.disconnect();
            Ok(())
        })
    }

    fn get_local_changes(&self, max_entries: usize) -> SyncResult<Vec<CommitRequestData>> {
        self.run(|core, _| core.get_local_changes(max_entries))
    }

    fn on_commit_completed(
        &self,
        state: ModelTypeState,
        responses: Vec<CommitResponseData>,
    ) -> SyncResult<()> {
        self.run(|core, effects| core.on_commit_completed(state, &responses, effects))
    }

    fn on_update_received(
        &self,
        state: ModelTypeState,
        updates: Vec<UpdateResponseData>,
    ) -> SyncResult<ApplyReport> {
        self.run(|core, effects| core.on_update_received(state, &updates, effects))
    }
}
