//! # marksync engine
//!
//! Reconciles a local bookmark tree with a remote collection.
//!
//! The engine sits between a [`BookmarkModel`](marksync_model::BookmarkModel)
//! and a commit queue that talks to the server. It applies inbound update
//! batches to the tree, records local edits for the next commit, and keeps
//! the sync metadata that ties tree nodes to server entities.
//!
//! ## Components
//!
//! - [`SyncedBookmarkTracker`] - Server id ↔ node mapping plus per-entity bookkeeping
//! - [`UpdateReconciler`] - Applies one inbound batch to the tree
//! - [`LocalChangeObserver`] - Turns local tree edits into unsynced entities
//! - [`BookmarkSyncProcessor`] - Lifecycle, metadata persistence and the commit channel
//!
//! ## Example
//!
//! ```rust
//! use marksync_engine::{
//!     BookmarkSpecifics, BookmarkSyncProcessor, EntityData, ModelTypeState, ProcessorState,
//!     SyncConfig, UpdateResponseData, BOOKMARKS_ROOT_ID, BOOKMARK_BAR_TAG,
//! };
//! use marksync_model::MemoryBookmarkModel;
//! use parking_lot::Mutex;
//! use std::sync::Arc;
//!
//! let model = Arc::new(Mutex::new(MemoryBookmarkModel::new()));
//! let processor = BookmarkSyncProcessor::new(SyncConfig::default());
//! processor.decode_sync_metadata(&[], Arc::new(|| {}), model).unwrap();
//!
//! let bar = UpdateResponseData {
//!     entity: EntityData {
//!         id: "bar".into(),
//!         parent_id: BOOKMARKS_ROOT_ID.into(),
//!         server_defined_unique_tag: Some(BOOKMARK_BAR_TAG.into()),
//!         is_folder: true,
//!         specifics: Some(BookmarkSpecifics::folder("Bookmarks bar")),
//!         ..EntityData::default()
//!     },
//!     response_version: 0,
//! };
//! let report = processor
//!     .on_update_received(ModelTypeState::default(), vec![bar])
//!     .unwrap();
//! assert_eq!(report.associated, 1);
//! assert_eq!(processor.state(), ProcessorState::Tracking);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod error;
mod metadata;
mod observer;
mod processor;
mod reconciler;
mod reorder;
mod sequence;
mod stats;
mod tracker;
mod transport;
mod types;

pub use config::{OrphanPolicy, ReorderStrategy, SyncConfig};
pub use conflict::{Conflict, ConflictPolicy, ConflictResolution};
pub use error::{SyncError, SyncResult};
pub use metadata::{
    BookmarkMetadata, BookmarkModelMetadata, EntityMetadata, MetadataIssue,
    METADATA_FORMAT_VERSION,
};
pub use observer::{adopt_untracked_nodes, LocalChangeObserver, SharedCommitQueue, SharedTracker};
pub use processor::{
    BookmarkSyncProcessor, DebugNode, ProcessorHandle, ProcessorState, ScheduleSave,
};
pub use reconciler::{ApplyReport, DropReason, DroppedUpdate, ScopedRemoteUpdate, UpdateReconciler};
pub use reorder::reorder_updates;
pub use sequence::SequenceChecker;
pub use stats::{StatusCounters, SyncStats, SyncStatsSnapshot};
pub use tracker::{SyncedBookmarkTracker, TrackedEntity};
pub use transport::{
    ActivationRequest, ActivationResponse, CommitQueue, ErrorHandler, MetadataFate,
    MockCommitQueue, ModelTypeProcessor, StartCallback,
};
pub use types::{
    now_micros, permanent_folder_for_tag, tag_for_permanent_folder, BookmarkSpecifics,
    CommitRequestData, CommitResponseData, EntityData, MetaInfo, ModelTypeState,
    ProgressMarker, UpdateResponseData, BOOKMARKS_DATA_TYPE_ID, BOOKMARKS_ROOT_ID,
    BOOKMARKS_ROOT_TAG, BOOKMARK_BAR_TAG, MOBILE_BOOKMARKS_TAG, OTHER_BOOKMARKS_TAG,
    ROOT_PARENT_ID, UNCOMMITTED_VERSION, WINDOWS_EPOCH_DELTA_US,
};
