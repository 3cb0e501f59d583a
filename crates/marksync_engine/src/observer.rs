//! Local change observer.
//!
//! Bridges tree notifications into the tracker: local edits bump sequence
//! numbers, new nodes below tracked folders become local creations, and
//! removed nodes become tombstones. Whenever unsynced work exists after an
//! event, the attached commit queue is nudged.

use crate::tracker::SyncedBookmarkTracker;
use crate::transport::CommitQueue;
use crate::types::{now_micros, BookmarkSpecifics, UNCOMMITTED_VERSION};
use marksync_model::{BookmarkModel, BookmarkModelObserver, BookmarkNode, NodeChange, NodeId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Tracker shared between the processor and its observer. `None` until the
/// first sync or a metadata decode created one.
pub type SharedTracker = Arc<Mutex<Option<SyncedBookmarkTracker>>>;

/// Commit queue slot shared between the processor and its observer.
pub type SharedCommitQueue = Arc<Mutex<Option<Box<dyn CommitQueue>>>>;

/// Tree observer that records local edits in the tracker.
///
/// Remote updates suspend the observer so that changes made on sync's
/// behalf are not reported back as local edits.
pub struct LocalChangeObserver {
    tracker: SharedTracker,
    commit_queue: SharedCommitQueue,
    suspended: AtomicUsize,
}

impl LocalChangeObserver {
    /// Creates an observer over the given tracker and commit queue slots.
    pub fn new(tracker: SharedTracker, commit_queue: SharedCommitQueue) -> Self {
        Self {
            tracker,
            commit_queue,
            suspended: AtomicUsize::new(0),
        }
    }

    /// Returns true while remote updates are being applied.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn suspend(&self) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn resume(&self) {
        let previous = self.suspended.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "unbalanced observer resume");
    }

    fn node_added(tracker: &mut SyncedBookmarkTracker, node: &BookmarkNode) {
        let Some(parent) = node.parent else {
            return;
        };
        if tracker.get_entity_for_node(parent).is_none() {
            return;
        }
        track_local_creation(tracker, node);
    }

    fn node_removed(tracker: &mut SyncedBookmarkTracker, node: NodeId, descendants: &[NodeId]) {
        let now = now_micros();
        for id in std::iter::once(&node).chain(descendants) {
            let Some(entity) = tracker.get_entity_for_node(*id) else {
                continue;
            };
            let sync_id = entity.sync_id().to_string();
            if entity.is_committed() {
                tracker.mark_deleted(&sync_id, now);
            } else {
                tracker.remove(&sync_id);
            }
        }
    }

    fn node_edited(tracker: &mut SyncedBookmarkTracker, node: NodeId) {
        if let Some(sync_id) = tracker.sync_id_for_node(node).map(str::to_string) {
            tracker.increment_sequence_number(&sync_id);
        }
    }

    fn nudge(&self) {
        if let Some(queue) = self.commit_queue.lock().as_ref() {
            queue.nudge_for_commit();
        }
    }
}

impl BookmarkModelObserver for LocalChangeObserver {
    fn on_node_change(&self, change: &NodeChange) {
        if self.is_suspended() {
            return;
        }

        let has_local_changes = {
            let mut guard = self.tracker.lock();
            let Some(tracker) = guard.as_mut() else {
                return;
            };
            match change {
                NodeChange::Added { node } => Self::node_added(tracker, node),
                NodeChange::Removed {
                    node, descendants, ..
                } => Self::node_removed(tracker, node.id, descendants),
                NodeChange::Changed { node } => Self::node_edited(tracker, node.id),
                NodeChange::Moved { node, .. } => Self::node_edited(tracker, *node),
                NodeChange::ChildrenReordered { children, .. } => {
                    for child in children {
                        Self::node_edited(tracker, *child);
                    }
                }
            }
            tracker.has_local_changes()
        };

        if has_local_changes {
            self.nudge();
        }
    }
}

fn track_local_creation(tracker: &mut SyncedBookmarkTracker, node: &BookmarkNode) {
    let sync_id = Uuid::new_v4().to_string();
    tracing::debug!(%sync_id, node = %node.id, "tracking local creation");
    tracker.add(
        &sync_id,
        node.id,
        UNCOMMITTED_VERSION,
        node.creation_time,
        &BookmarkSpecifics::from_node(node),
    );
    tracker.increment_sequence_number(&sync_id);
}

/// Tracks every untracked, non-permanent node whose parent is tracked.
///
/// Nodes are visited in pre-order, so whole untracked subtrees below a
/// tracked folder are adopted. Returns the number of adopted nodes.
pub fn adopt_untracked_nodes<M: BookmarkModel + ?Sized>(
    model: &M,
    tracker: &mut SyncedBookmarkTracker,
) -> usize {
    let mut adopted = 0;
    for id in model.nodes_preorder() {
        let Some(node) = model.node(id) else {
            continue;
        };
        if node.is_permanent() || tracker.get_entity_for_node(id).is_some() {
            continue;
        }
        let parent_tracked = node
            .parent
            .is_some_and(|parent| tracker.get_entity_for_node(parent).is_some());
        if parent_tracked {
            track_local_creation(tracker, node);
            adopted += 1;
        }
    }
    if adopted > 0 {
        tracing::info!(adopted, "adopted untracked local bookmarks");
    }
    adopted
}
