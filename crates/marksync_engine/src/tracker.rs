//! Entity tracker.
//!
//! [`SyncedBookmarkTracker`] maps server ids to local nodes and carries the
//! sync metadata of every tracked entity. It is the single source of truth
//! for which nodes participate in sync.
//!
//! # Invariants
//!
//! - A tracked entity has a node iff it is not a tombstone
//! - Server ids are unique, and so are the nodes of live entities
//!
//! Violating a precondition (adding an id twice, bumping an untracked id)
//! is a programming error and trips a debug assertion.

use crate::metadata::{BookmarkMetadata, BookmarkModelMetadata, EntityMetadata};
use crate::types::{BookmarkSpecifics, EntityData, ModelTypeState, UNCOMMITTED_VERSION};
use marksync_model::NodeId;
use std::collections::{BTreeSet, HashMap};

/// Sync state of one node, or of a pending deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntity {
    node: Option<NodeId>,
    metadata: EntityMetadata,
}

impl TrackedEntity {
    /// The local node; `None` for tombstones.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// The sync metadata.
    pub fn metadata(&self) -> &EntityMetadata {
        &self.metadata
    }

    /// The server (or client) id.
    pub fn sync_id(&self) -> &str {
        &self.metadata.server_id
    }

    /// Returns true for tombstones.
    pub fn is_tombstone(&self) -> bool {
        self.metadata.is_deleted
    }

    /// Returns true if local edits are waiting for a commit.
    pub fn is_unsynced(&self) -> bool {
        self.metadata.is_unsynced()
    }

    /// Returns true once the server has accepted the entity.
    pub fn is_committed(&self) -> bool {
        self.metadata.server_version != UNCOMMITTED_VERSION
    }

    /// Returns true if `data` carries the content this entity last synced.
    ///
    /// Two tombstones always match. A live entity matches when the hash of
    /// the incoming specifics equals the stored hash.
    pub fn matches_data(&self, data: &EntityData) -> bool {
        match (&data.specifics, self.metadata.is_deleted) {
            (None, deleted) => deleted,
            (Some(_), true) => false,
            (Some(specifics), false) => specifics.hash() == self.metadata.specifics_hash,
        }
    }
}

/// Bidirectional map between server ids and local nodes.
#[derive(Debug, Clone, Default)]
pub struct SyncedBookmarkTracker {
    entities: HashMap<String, TrackedEntity>,
    node_to_id: HashMap<NodeId, String>,
    model_type_state: ModelTypeState,
    dirty: BTreeSet<String>,
    removed: BTreeSet<String>,
}

impl SyncedBookmarkTracker {
    /// Creates an empty tracker.
    pub fn new(model_type_state: ModelTypeState) -> Self {
        Self {
            model_type_state,
            ..Self::default()
        }
    }

    /// Creates a tracker from already validated records.
    ///
    /// Records whose server id or node is already taken are skipped with an
    /// error log.
    pub fn from_metadata(
        entries: Vec<(Option<NodeId>, EntityMetadata)>,
        model_type_state: ModelTypeState,
    ) -> Self {
        let mut tracker = Self::new(model_type_state);
        for (node, metadata) in entries {
            let id = metadata.server_id.clone();
            if tracker.entities.contains_key(&id) {
                tracing::error!(sync_id = %id, "duplicate server id in sync metadata");
                continue;
            }
            if let Some(node) = node {
                if tracker.node_to_id.contains_key(&node) {
                    tracing::error!(sync_id = %id, %node, "node tracked twice in sync metadata");
                    continue;
                }
                tracker.node_to_id.insert(node, id.clone());
            }
            tracker.entities.insert(id, TrackedEntity { node, metadata });
        }
        tracker
    }

    /// Looks up an entity by server id.
    pub fn get_entity_for_sync_id(&self, sync_id: &str) -> Option<&TrackedEntity> {
        self.entities.get(sync_id)
    }

    /// Looks up the live entity of a node.
    pub fn get_entity_for_node(&self, node: NodeId) -> Option<&TrackedEntity> {
        self.node_to_id
            .get(&node)
            .and_then(|id| self.entities.get(id))
    }

    /// Returns the server id of a node's entity.
    pub fn sync_id_for_node(&self, node: NodeId) -> Option<&str> {
        self.node_to_id.get(&node).map(String::as_str)
    }

    /// Starts tracking a node.
    pub fn add(
        &mut self,
        sync_id: &str,
        node: NodeId,
        server_version: i64,
        creation_time: i64,
        specifics: &BookmarkSpecifics,
    ) {
        debug_assert!(!self.entities.contains_key(sync_id), "{sync_id} already tracked");
        debug_assert!(!self.node_to_id.contains_key(&node), "{node} already tracked");

        let metadata = EntityMetadata {
            server_id: sync_id.to_string(),
            is_deleted: false,
            sequence_number: 0,
            acked_sequence_number: 0,
            server_version,
            creation_time,
            modification_time: creation_time,
            specifics_hash: specifics.hash(),
        };
        self.node_to_id.insert(node, sync_id.to_string());
        self.entities.insert(
            sync_id.to_string(),
            TrackedEntity {
                node: Some(node),
                metadata,
            },
        );
        self.mark_dirty(sync_id);
    }

    /// Records a remote update of a live entity.
    pub fn update(
        &mut self,
        sync_id: &str,
        server_version: i64,
        modification_time: i64,
        specifics: &BookmarkSpecifics,
    ) {
        let Some(entity) = self.entities.get_mut(sync_id) else {
            debug_assert!(false, "update of untracked {sync_id}");
            return;
        };
        debug_assert!(!entity.is_tombstone(), "update of tombstone {sync_id}");

        entity.metadata.server_version = server_version;
        entity.metadata.modification_time = modification_time;
        entity.metadata.specifics_hash = specifics.hash();
        self.mark_dirty(sync_id);
    }

    /// Stops tracking an entity.
    pub fn remove(&mut self, sync_id: &str) {
        if let Some(entity) = self.entities.remove(sync_id) {
            if let Some(node) = entity.node {
                self.node_to_id.remove(&node);
            }
            self.dirty.remove(sync_id);
            self.removed.insert(sync_id.to_string());
        }
    }

    /// Records a local edit.
    pub fn increment_sequence_number(&mut self, sync_id: &str) {
        let Some(entity) = self.entities.get_mut(sync_id) else {
            debug_assert!(false, "sequence bump of untracked {sync_id}");
            return;
        };
        debug_assert!(!entity.is_tombstone(), "sequence bump of tombstone {sync_id}");

        entity.metadata.sequence_number += 1;
        self.mark_dirty(sync_id);
    }

    /// Turns a live entity into a tombstone awaiting commit.
    pub fn mark_deleted(&mut self, sync_id: &str, modification_time: i64) {
        let Some(entity) = self.entities.get_mut(sync_id) else {
            debug_assert!(false, "deletion of untracked {sync_id}");
            return;
        };
        if let Some(node) = entity.node.take() {
            self.node_to_id.remove(&node);
        }
        entity.metadata.is_deleted = true;
        entity.metadata.specifics_hash.clear();
        entity.metadata.modification_time = modification_time;
        entity.metadata.sequence_number += 1;
        self.mark_dirty(sync_id);
    }

    /// Drops pending local edits by acknowledging them.
    pub fn discard_local_changes(&mut self, sync_id: &str) {
        if let Some(entity) = self.entities.get_mut(sync_id) {
            entity.metadata.acked_sequence_number = entity.metadata.sequence_number;
            self.mark_dirty(sync_id);
        }
    }

    /// Applies a commit response.
    ///
    /// Tombstones whose deletion is fully acknowledged are removed.
    pub fn update_upon_commit_response(
        &mut self,
        sync_id: &str,
        server_version: i64,
        acked_sequence_number: i64,
    ) {
        let Some(entity) = self.entities.get_mut(sync_id) else {
            debug_assert!(false, "commit response for untracked {sync_id}");
            return;
        };
        entity.metadata.acked_sequence_number = acked_sequence_number;
        entity.metadata.server_version = server_version;

        if entity.is_tombstone() && !entity.is_unsynced() {
            self.remove(sync_id);
        } else {
            self.mark_dirty(sync_id);
        }
    }

    /// Re-keys an entity after the server assigned its id.
    pub fn update_sync_id(&mut self, old_id: &str, new_id: &str) {
        if old_id == new_id {
            return;
        }
        debug_assert!(!self.entities.contains_key(new_id), "{new_id} already tracked");
        let Some(mut entity) = self.entities.remove(old_id) else {
            debug_assert!(false, "re-key of untracked {old_id}");
            return;
        };
        entity.metadata.server_id = new_id.to_string();
        if let Some(node) = entity.node {
            self.node_to_id.insert(node, new_id.to_string());
        }
        self.entities.insert(new_id.to_string(), entity);

        self.dirty.remove(old_id);
        self.removed.insert(old_id.to_string());
        self.mark_dirty(new_id);
    }

    /// Replaces the stored hash of a live entity.
    pub fn update_specifics_hash(&mut self, sync_id: &str, specifics: &BookmarkSpecifics) {
        if let Some(entity) = self.entities.get_mut(sync_id) {
            entity.metadata.specifics_hash = specifics.hash();
            self.mark_dirty(sync_id);
        }
    }

    /// Returns true if any entity is unsynced.
    pub fn has_local_changes(&self) -> bool {
        self.entities.values().any(TrackedEntity::is_unsynced)
    }

    /// Returns every unsynced entity, in no particular order.
    pub fn entities_with_local_changes(&self) -> Vec<&TrackedEntity> {
        self.entities
            .values()
            .filter(|entity| entity.is_unsynced())
            .collect()
    }

    /// Iterates over all entities.
    pub fn entities(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entities.values()
    }

    /// The global sync state.
    pub fn model_type_state(&self) -> &ModelTypeState {
        &self.model_type_state
    }

    /// Replaces the global sync state.
    pub fn set_model_type_state(&mut self, state: ModelTypeState) {
        self.model_type_state = state;
    }

    /// Number of tracked entities, tombstones included.
    pub fn tracked_entities_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of tombstones.
    pub fn tombstone_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_tombstone()).count()
    }

    /// Number of unsynced entities.
    pub fn unsynced_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_unsynced()).count()
    }

    /// Serializes every entity plus the global state.
    ///
    /// Live entities come in the order of `preorder`; entities whose node is
    /// not listed and tombstones follow, sorted by id.
    pub fn build_bookmark_model_metadata(&self, preorder: &[NodeId]) -> BookmarkModelMetadata {
        let mut bookmarks_metadata = Vec::with_capacity(self.entities.len());
        for node in preorder {
            if let Some(entity) = self.get_entity_for_node(*node) {
                bookmarks_metadata.push(BookmarkMetadata {
                    id: Some(*node),
                    metadata: entity.metadata.clone(),
                });
            }
        }

        let listed: std::collections::HashSet<NodeId> = preorder.iter().copied().collect();
        let mut rest: Vec<&TrackedEntity> = self
            .entities
            .values()
            .filter(|e| e.node.map_or(true, |node| !listed.contains(&node)))
            .collect();
        rest.sort_by(|a, b| a.sync_id().cmp(b.sync_id()));
        bookmarks_metadata.extend(rest.into_iter().map(|entity| BookmarkMetadata {
            id: entity.node,
            metadata: entity.metadata.clone(),
        }));

        BookmarkModelMetadata {
            model_type_state: self.model_type_state.clone(),
            bookmarks_metadata,
            ..BookmarkModelMetadata::default()
        }
    }

    /// Takes the ids written and removed since the last call.
    pub fn take_pending_writes(&mut self) -> (Vec<String>, Vec<String>) {
        let dirty = std::mem::take(&mut self.dirty).into_iter().collect();
        let removed = std::mem::take(&mut self.removed).into_iter().collect();
        (dirty, removed)
    }

    /// Queues every entity for the next write.
    pub fn mark_all_dirty(&mut self) {
        self.dirty.extend(self.entities.keys().cloned());
    }

    /// Puts back ids whose write failed.
    pub fn restore_pending_writes(&mut self, dirty: Vec<String>, removed: Vec<String>) {
        for id in removed {
            if !self.entities.contains_key(&id) {
                self.removed.insert(id);
            }
        }
        for id in dirty {
            if self.entities.contains_key(&id) {
                self.dirty.insert(id);
            }
        }
    }

    fn mark_dirty(&mut self, sync_id: &str) {
        self.removed.remove(sync_id);
        self.dirty.insert(sync_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specifics(title: &str) -> BookmarkSpecifics {
        BookmarkSpecifics::url(title, "http://www.url.com")
    }

    fn tracker_with(id: &str, node: u64) -> SyncedBookmarkTracker {
        let mut tracker = SyncedBookmarkTracker::default();
        tracker.add(id, NodeId(node), 1, 100, &specifics("t"));
        tracker
    }

    #[test]
    fn add_and_lookup() {
        let tracker = tracker_with("id1", 7);
        let entity = tracker.get_entity_for_sync_id("id1").unwrap();
        assert_eq!(entity.node(), Some(NodeId(7)));
        assert_eq!(entity.metadata().server_version, 1);
        assert_eq!(entity.metadata().sequence_number, 0);
        assert!(!entity.is_tombstone());
        assert_eq!(tracker.sync_id_for_node(NodeId(7)), Some("id1"));
        assert!(tracker.get_entity_for_sync_id("other").is_none());
    }

    #[test]
    fn matches_data_compares_hash() {
        let tracker = tracker_with("id1", 7);
        let entity = tracker.get_entity_for_sync_id("id1").unwrap();

        let mut data = EntityData {
            id: "id1".into(),
            specifics: Some(specifics("t")),
            ..EntityData::default()
        };
        assert!(entity.matches_data(&data));

        data.specifics = Some(specifics("changed"));
        assert!(!entity.matches_data(&data));

        data.specifics = None;
        assert!(!entity.matches_data(&data));
    }

    #[test]
    fn tombstones_match_tombstones() {
        let mut tracker = tracker_with("id1", 7);
        tracker.mark_deleted("id1", 200);
        let entity = tracker.get_entity_for_sync_id("id1").unwrap();

        assert!(entity.matches_data(&EntityData::default()));
        assert!(!entity.matches_data(&EntityData {
            specifics: Some(specifics("t")),
            ..EntityData::default()
        }));
    }

    #[test]
    fn update_refreshes_bookkeeping() {
        let mut tracker = tracker_with("id1", 7);
        tracker.update("id1", 5, 300, &specifics("new"));

        let entity = tracker.get_entity_for_sync_id("id1").unwrap();
        assert_eq!(entity.metadata().server_version, 5);
        assert_eq!(entity.metadata().modification_time, 300);
        assert_eq!(entity.metadata().specifics_hash, specifics("new").hash());
        assert_eq!(entity.node(), Some(NodeId(7)));
        assert_eq!(entity.metadata().sequence_number, 0);
    }

    #[test]
    fn local_changes_until_acked() {
        let mut tracker = tracker_with("id1", 7);
        assert!(!tracker.has_local_changes());

        tracker.increment_sequence_number("id1");
        assert!(tracker.has_local_changes());
        assert_eq!(tracker.entities_with_local_changes().len(), 1);

        tracker.update_upon_commit_response("id1", 2, 1);
        assert!(!tracker.has_local_changes());
        assert_eq!(
            tracker.get_entity_for_sync_id("id1").unwrap().metadata().server_version,
            2
        );
    }

    #[test]
    fn acked_tombstone_is_removed() {
        let mut tracker = tracker_with("id1", 7);
        tracker.mark_deleted("id1", 200);
        assert!(tracker.get_entity_for_node(NodeId(7)).is_none());
        assert_eq!(tracker.tombstone_count(), 1);
        assert!(tracker.has_local_changes());

        tracker.update_upon_commit_response("id1", 3, 1);
        assert_eq!(tracker.tracked_entities_count(), 0);
    }

    #[test]
    fn update_sync_id_rekeys() {
        let mut tracker = tracker_with("client", 7);
        tracker.update_sync_id("client", "server");

        assert!(tracker.get_entity_for_sync_id("client").is_none());
        let entity = tracker.get_entity_for_sync_id("server").unwrap();
        assert_eq!(entity.sync_id(), "server");
        assert_eq!(tracker.sync_id_for_node(NodeId(7)), Some("server"));

        let (dirty, removed) = tracker.take_pending_writes();
        assert_eq!(dirty, vec!["server".to_string()]);
        assert_eq!(removed, vec!["client".to_string()]);
    }

    #[test]
    fn remove_clears_both_directions() {
        let mut tracker = tracker_with("id1", 7);
        tracker.remove("id1");
        assert!(tracker.get_entity_for_sync_id("id1").is_none());
        assert!(tracker.get_entity_for_node(NodeId(7)).is_none());
    }

    #[test]
    fn pending_writes_roundtrip() {
        let mut tracker = tracker_with("a", 1);
        tracker.add("b", NodeId(2), 1, 100, &specifics("b"));
        tracker.remove("b");

        let (dirty, removed) = tracker.take_pending_writes();
        assert_eq!(dirty, vec!["a".to_string()]);
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(tracker.take_pending_writes(), (vec![], vec![]));

        tracker.restore_pending_writes(dirty, removed);
        assert_eq!(tracker.take_pending_writes().0, vec!["a".to_string()]);
    }

    #[test]
    fn metadata_follows_preorder() {
        let mut tracker = SyncedBookmarkTracker::default();
        tracker.add("z", NodeId(1), 1, 0, &specifics("bar"));
        tracker.add("b", NodeId(5), 1, 0, &specifics("n1"));
        tracker.add("a", NodeId(6), 1, 0, &specifics("n2"));
        tracker.add("gone", NodeId(9), 1, 0, &specifics("g"));
        tracker.mark_deleted("gone", 10);

        let metadata = tracker.build_bookmark_model_metadata(&[NodeId(0), NodeId(1), NodeId(5), NodeId(6)]);
        let ids: Vec<_> = metadata
            .bookmarks_metadata
            .iter()
            .map(|m| m.metadata.server_id.as_str())
            .collect();
        assert_eq!(ids, vec!["z", "b", "a", "gone"]);
        assert_eq!(metadata.bookmarks_metadata[3].id, None);
        assert!(metadata.bookmarks_metadata[3].metadata.is_deleted);
    }

    #[test]
    fn from_metadata_skips_duplicates() {
        let meta = |id: &str| EntityMetadata {
            server_id: id.into(),
            ..EntityMetadata::default()
        };
        let tracker = SyncedBookmarkTracker::from_metadata(
            vec![
                (Some(NodeId(1)), meta("a")),
                (Some(NodeId(2)), meta("a")),
                (Some(NodeId(1)), meta("b")),
                (None, EntityMetadata { is_deleted: true, ..meta("c") }),
            ],
            ModelTypeState::default(),
        );
        assert_eq!(tracker.tracked_entities_count(), 2);
        assert_eq!(tracker.tombstone_count(), 1);
        assert_eq!(tracker.sync_id_for_node(NodeId(1)), Some("a"));
    }
}
