//! Update reconciler.
//!
//! Applies an inbound update batch to the tree and keeps the tracker in
//! step. Every record is routed through a small state machine:
//!
//! ```text
//! deletion ───────────────────────────────▶ remote delete
//! untracked ──────────────────────────────▶ remote create
//! tracked, permanent node ────────────────▶ skip
//! tracked ────────────────────────────────▶ remote update
//! ```
//!
//! Per-record problems never abort the batch. They are logged and listed in
//! the returned [`ApplyReport`].

use crate::config::{OrphanPolicy, SyncConfig};
use crate::conflict::{Conflict, ConflictResolution};
use crate::observer::LocalChangeObserver;
use crate::reorder::reorder_updates;
use crate::tracker::SyncedBookmarkTracker;
use crate::types::{
    permanent_folder_for_tag, BookmarkSpecifics, EntityData, UpdateResponseData,
    BOOKMARKS_ROOT_ID,
};
use marksync_model::{BookmarkModel, ModelError, NewNode, NodeId, NodeKind};
use std::ops::{Deref, DerefMut};

/// Why a record was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The specifics are empty or carry a malformed URL.
    InvalidSpecifics,
    /// The parent is not tracked.
    MissingParent,
    /// The tree refused to create the node.
    CreateFailed,
    /// Folder/URL kind differs from the local node.
    KindMismatch,
    /// The entity has unsynced local edits and the local side won.
    UnsyncedConflict,
    /// A top-level record names no known permanent folder.
    UnknownPermanentTag,
    /// The permanent folder is already associated with another id.
    AlreadyAssociated,
    /// Deleting a folder that still has children.
    NonEmptyFolder,
    /// Deletion of an entity that is not tracked.
    UntrackedTombstone,
    /// The tree refused to apply an update or deletion.
    UpdateFailed,
    /// The orphan buffer is full.
    DeferLimitExceeded,
}

/// A record that was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedUpdate {
    /// Server id of the record.
    pub id: String,
    /// Why it was dropped.
    pub reason: DropReason,
}

/// Outcome of applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Nodes created.
    pub created: usize,
    /// Nodes whose content changed.
    pub updated: usize,
    /// Updates that only refreshed metadata.
    pub metadata_only: usize,
    /// Nodes removed, tombstones included.
    pub deleted: usize,
    /// Permanent folders associated.
    pub associated: usize,
    /// Remote creates matched to existing local nodes.
    pub merged: usize,
    /// Records about permanent folders that were skipped.
    pub skipped_permanent: usize,
    /// Orphans waiting for their parent.
    pub deferred: usize,
    /// Records that were not applied.
    pub dropped: Vec<DroppedUpdate>,
    /// Conflicts with unsynced local edits, resolved.
    pub conflicts: Vec<Conflict>,
    /// Metadata-only changes that need a standalone save.
    pub save_requests: usize,
}

impl ApplyReport {
    /// Number of records that changed the tree or the tracker.
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.metadata_only + self.deleted + self.associated + self.merged
    }

    /// Returns true if nothing was dropped.
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty()
    }

    /// Returns the reasons records were dropped for, in order.
    pub fn drop_reasons(&self) -> Vec<DropReason> {
        self.dropped.iter().map(|d| d.reason).collect()
    }
}

/// Tree access for the duration of a remote update.
///
/// Undo recording is suspended, observers see one run of extensive changes
/// and the local change observer is muted. Everything is restored on drop,
/// on every exit path.
pub struct ScopedRemoteUpdate<'a, M: BookmarkModel + ?Sized> {
    model: &'a mut M,
    observer: Option<&'a LocalChangeObserver>,
}

impl<'a, M: BookmarkModel + ?Sized> ScopedRemoteUpdate<'a, M> {
    /// Opens the scope.
    pub fn new(model: &'a mut M, observer: Option<&'a LocalChangeObserver>) -> Self {
        model.suspend_undo();
        model.begin_extensive_changes();
        if let Some(observer) = observer {
            observer.suspend();
        }
        Self { model, observer }
    }
}

impl<M: BookmarkModel + ?Sized> Deref for ScopedRemoteUpdate<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: BookmarkModel + ?Sized> DerefMut for ScopedRemoteUpdate<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.model
    }
}

impl<M: BookmarkModel + ?Sized> Drop for ScopedRemoteUpdate<'_, M> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer {
            observer.resume();
        }
        self.model.end_extensive_changes();
        self.model.resume_undo();
    }
}

enum Outcome {
    Done,
    Orphaned,
}

/// Applies update batches to a tree and its tracker.
pub struct UpdateReconciler<'a, M: BookmarkModel + ?Sized> {
    model: ScopedRemoteUpdate<'a, M>,
    tracker: &'a mut SyncedBookmarkTracker,
    config: &'a SyncConfig,
    initial_merge: bool,
    report: ApplyReport,
}

impl<'a, M: BookmarkModel + ?Sized> UpdateReconciler<'a, M> {
    /// Opens a remote update scope over `model`.
    pub fn new(
        model: &'a mut M,
        tracker: &'a mut SyncedBookmarkTracker,
        config: &'a SyncConfig,
        observer: Option<&'a LocalChangeObserver>,
    ) -> Self {
        Self {
            model: ScopedRemoteUpdate::new(model, observer),
            tracker,
            config,
            initial_merge: false,
            report: ApplyReport::default(),
        }
    }

    /// Matches remote creates against identical untracked local nodes.
    pub fn with_initial_merge(mut self, enabled: bool) -> Self {
        self.initial_merge = enabled && self.config.merge_on_initial_sync;
        self
    }

    /// Applies a batch.
    ///
    /// `deferred` holds orphans from earlier batches under
    /// [`OrphanPolicy::Defer`]; it is retried after the batch and left
    /// holding whatever still has no parent.
    pub fn apply_batch(
        mut self,
        updates: &[UpdateResponseData],
        deferred: &mut Vec<UpdateResponseData>,
    ) -> ApplyReport {
        let ordered = {
            let tracker = &*self.tracker;
            let model = &*self.model;
            reorder_updates(updates, self.config.reorder_strategy, |id| {
                tracker
                    .get_entity_for_sync_id(id)
                    .and_then(|entity| entity.node())
                    .and_then(|node| model.node_depth(node))
            })
        };

        for update in ordered {
            if update.entity.is_deleted() {
                deferred.retain(|d| d.entity.id != update.entity.id);
            }
            if let Outcome::Orphaned = self.apply_update(update) {
                self.defer(update.clone(), deferred);
            }
        }

        self.retry_deferred(deferred);
        self.report.deferred = deferred.len();
        self.report
    }

    fn defer(&mut self, update: UpdateResponseData, deferred: &mut Vec<UpdateResponseData>) {
        let id = update.entity.id.clone();
        match self.config.orphan_policy {
            OrphanPolicy::Drop => {
                tracing::error!(id = %id, parent = %update.entity.parent_id, "could not find parent of node being added");
                self.drop_update(&id, DropReason::MissingParent);
            }
            OrphanPolicy::Defer if deferred.len() >= self.config.max_deferred_updates => {
                tracing::error!(id = %id, limit = self.config.max_deferred_updates, "orphan buffer full");
                self.drop_update(&id, DropReason::DeferLimitExceeded);
            }
            OrphanPolicy::Defer => {
                tracing::debug!(id = %id, parent = %update.entity.parent_id, "deferring orphaned update");
                deferred.retain(|d| d.entity.id != id);
                deferred.push(update);
            }
        }
    }

    fn retry_deferred(&mut self, deferred: &mut Vec<UpdateResponseData>) {
        loop {
            let pending = std::mem::take(deferred);
            let before = pending.len();
            for update in pending {
                // A newer record for the same id already landed.
                if self
                    .tracker
                    .get_entity_for_sync_id(&update.entity.id)
                    .is_some_and(|entity| !entity.is_tombstone())
                {
                    continue;
                }
                if let Outcome::Orphaned = self.apply_update(&update) {
                    deferred.push(update);
                }
            }
            if deferred.is_empty() || deferred.len() == before {
                break;
            }
        }
    }

    fn apply_update(&mut self, update: &UpdateResponseData) -> Outcome {
        let data = &update.entity;
        if data.is_deleted() {
            self.process_remote_delete(data);
            return Outcome::Done;
        }

        let Some(entity) = self.tracker.get_entity_for_sync_id(&data.id) else {
            return self.process_remote_create(update);
        };
        if entity
            .node()
            .is_some_and(|node| self.model.is_permanent_node(node))
        {
            // Only the children of permanent folders matter.
            self.report.skipped_permanent += 1;
            return Outcome::Done;
        }
        self.process_remote_update(update)
    }

    fn process_remote_create(&mut self, update: &UpdateResponseData) -> Outcome {
        let data = &update.entity;
        let Some(specifics) = data.specifics.as_ref() else {
            return Outcome::Done;
        };

        if data.parent_id == BOOKMARKS_ROOT_ID {
            self.associate_permanent_folder(update, specifics);
            return Outcome::Done;
        }

        if !specifics.is_valid_bookmark(data.is_folder) {
            tracing::error!(id = %data.id, "couldn't add bookmark with an invalid specifics");
            self.drop_update(&data.id, DropReason::InvalidSpecifics);
            return Outcome::Done;
        }

        let Some(parent) = self
            .tracker
            .get_entity_for_sync_id(&data.parent_id)
            .and_then(|entity| entity.node())
        else {
            return Outcome::Orphaned;
        };

        if self.initial_merge {
            if let Some(existing) = self.find_merge_candidate(parent, data, specifics) {
                tracing::debug!(id = %data.id, node = %existing, "matched remote bookmark to local node");
                self.forget_tombstone(&data.id);
                self.tracker.add(
                    &data.id,
                    existing,
                    update.response_version,
                    data.creation_time,
                    specifics,
                );
                self.report.merged += 1;
                return Outcome::Done;
            }
        }

        let index = self.model.children(parent).len();
        let node = new_node(data.is_folder, specifics);
        match self.model.add_node(parent, index, node) {
            Ok(id) => {
                self.forget_tombstone(&data.id);
                self.tracker.add(
                    &data.id,
                    id,
                    update.response_version,
                    data.creation_time,
                    specifics,
                );
                self.report.created += 1;
            }
            Err(e) => {
                tracing::error!(id = %data.id, title = %specifics.title, error = %e, "failed to create bookmark node");
                self.drop_update(&data.id, DropReason::CreateFailed);
            }
        }
        Outcome::Done
    }

    fn associate_permanent_folder(&mut self, update: &UpdateResponseData, specifics: &BookmarkSpecifics) {
        let data = &update.entity;
        let Some(folder) = data
            .server_defined_unique_tag
            .as_deref()
            .and_then(permanent_folder_for_tag)
        else {
            tracing::error!(id = %data.id, tag = ?data.server_defined_unique_tag, "top-level update without a known permanent folder tag");
            self.drop_update(&data.id, DropReason::UnknownPermanentTag);
            return;
        };

        let node = self.model.permanent_node(folder);
        if self.tracker.get_entity_for_node(node).is_some() {
            tracing::error!(id = %data.id, ?folder, "permanent folder already associated");
            self.drop_update(&data.id, DropReason::AlreadyAssociated);
            return;
        }

        self.forget_tombstone(&data.id);
        self.tracker.add(
            &data.id,
            node,
            update.response_version,
            data.creation_time,
            specifics,
        );
        self.report.associated += 1;
    }

    /// Drops a tombstone for `sync_id` that a recreated node is replacing.
    fn forget_tombstone(&mut self, sync_id: &str) {
        if self
            .tracker
            .get_entity_for_sync_id(sync_id)
            .is_some_and(|entity| entity.is_tombstone())
        {
            tracing::debug!(id = %sync_id, "remote recreation replaces local deletion");
            self.tracker.remove(sync_id);
        }
    }

    fn find_merge_candidate(
        &self,
        parent: NodeId,
        data: &EntityData,
        specifics: &BookmarkSpecifics,
    ) -> Option<NodeId> {
        let kind = if data.is_folder {
            NodeKind::Folder
        } else {
            NodeKind::Url
        };
        self.model.children(parent).iter().copied().find(|child| {
            self.tracker.get_entity_for_node(*child).is_none()
                && self.model.node(*child).is_some_and(|node| {
                    node.kind == kind
                        && node.title == specifics.title
                        && (data.is_folder || node.url == specifics.url)
                })
        })
    }

    fn process_remote_update(&mut self, update: &UpdateResponseData) -> Outcome {
        let data = &update.entity;
        let Some(specifics) = data.specifics.as_ref() else {
            return Outcome::Done;
        };
        if !specifics.is_valid_bookmark(data.is_folder) {
            tracing::error!(id = %data.id, "couldn't update bookmark with an invalid specifics");
            self.drop_update(&data.id, DropReason::InvalidSpecifics);
            return Outcome::Done;
        }

        let Some(entity) = self.tracker.get_entity_for_sync_id(&data.id) else {
            return Outcome::Done;
        };

        // Local changes are only discarded once the remote change has landed.
        let overrides_local = entity.is_unsynced();
        if overrides_local {
            let mut conflict = Conflict {
                sync_id: data.id.clone(),
                node: entity.node(),
                local_sequence_number: entity.metadata().sequence_number,
                acked_sequence_number: entity.metadata().acked_sequence_number,
                remote_version: update.response_version,
                local_hash: entity.metadata().specifics_hash.clone(),
                remote_hash: specifics.hash(),
                resolution: None,
            };
            self.config.conflict_policy.resolve(&mut conflict);
            let resolution = conflict.resolution;
            self.report.conflicts.push(conflict);

            if resolution != Some(ConflictResolution::AcceptRemote) {
                tracing::debug!(id = %data.id, "remote update to an unsynced entity dropped");
                self.drop_update(&data.id, DropReason::UnsyncedConflict);
                return Outcome::Done;
            }
        }

        if entity.is_tombstone() {
            // The tombstone is replaced only when the node is recreated.
            return self.process_remote_create(update);
        }

        if entity.matches_data(data) {
            self.tracker
                .update(&data.id, update.response_version, data.modification_time, specifics);
            if overrides_local {
                self.tracker.discard_local_changes(&data.id);
            }
            self.report.metadata_only += 1;
            self.report.save_requests += 1;
            return Outcome::Done;
        }

        let Some(node) = entity.node() else {
            return Outcome::Done;
        };
        let is_folder = self.model.node(node).is_some_and(|n| n.is_folder());
        if is_folder != data.is_folder {
            tracing::error!(
                id = %data.id,
                remote_is_folder = data.is_folder,
                local_is_folder = is_folder,
                "could not update node: folder/bookmark mismatch"
            );
            self.drop_update(&data.id, DropReason::KindMismatch);
            return Outcome::Done;
        }

        if let Err(e) = self.update_node(node, data.is_folder, specifics) {
            tracing::error!(id = %data.id, error = %e, "failed to update bookmark node");
            self.drop_update(&data.id, DropReason::UpdateFailed);
            return Outcome::Done;
        }
        self.tracker
            .update(&data.id, update.response_version, data.modification_time, specifics);
        if overrides_local {
            tracing::debug!(id = %data.id, "remote update overrode unsynced local edit");
            self.tracker.discard_local_changes(&data.id);
        }
        self.report.updated += 1;
        Outcome::Done
    }

    /// Writes `specifics` into `node`.
    ///
    /// Every precondition the model checks is verified before the first
    /// mutation, so a failure leaves the node untouched.
    fn update_node(
        &mut self,
        node: NodeId,
        is_folder: bool,
        specifics: &BookmarkSpecifics,
    ) -> marksync_model::ModelResult<()> {
        if !self.model.is_loaded() {
            return Err(ModelError::NotLoaded);
        }
        let current = self.model.node(node).ok_or(ModelError::NodeNotFound(node))?;
        if current.is_permanent() {
            return Err(ModelError::PermanentNode(node));
        }
        let url = if is_folder { None } else { specifics.url.as_deref() };
        if url.is_some() && current.kind != NodeKind::Url {
            return Err(ModelError::KindMismatch(node));
        }

        if let Some(url) = url {
            self.model.set_url(node, url)?;
        }
        self.model.set_title(node, &specifics.title)?;
        self.model.set_meta_info_map(node, specifics.meta_info_map())
    }

    fn process_remote_delete(&mut self, data: &EntityData) {
        let Some(entity) = self.tracker.get_entity_for_sync_id(&data.id) else {
            tracing::warn!(id = %data.id, "received remote delete for a non-existing item");
            self.drop_update(&data.id, DropReason::UntrackedTombstone);
            return;
        };

        let Some(node) = entity.node() else {
            // Both sides deleted it.
            self.tracker.remove(&data.id);
            self.report.deleted += 1;
            return;
        };

        if self.model.is_permanent_node(node) {
            self.report.skipped_permanent += 1;
            return;
        }

        if !self.model.children(node).is_empty() {
            tracing::warn!(id = %data.id, "trying to delete a non-empty folder");
            self.drop_update(&data.id, DropReason::NonEmptyFolder);
            return;
        }

        if let Err(e) = self.model.remove(node) {
            tracing::error!(id = %data.id, error = %e, "failed to remove bookmark node");
            self.drop_update(&data.id, DropReason::UpdateFailed);
            return;
        }
        self.tracker.remove(&data.id);
        self.report.deleted += 1;
    }

    fn drop_update(&mut self, id: &str, reason: DropReason) {
        self.report.dropped.push(DroppedUpdate {
            id: id.to_string(),
            reason,
        });
    }
}

fn new_node(is_folder: bool, specifics: &BookmarkSpecifics) -> NewNode {
    let mut node = if is_folder {
        NewNode::folder(specifics.title.clone())
    } else {
        NewNode::url(
            specifics.title.clone(),
            specifics.url.clone().unwrap_or_default(),
        )
    };
    if let Some(creation_time) = specifics.creation_time_unix_us() {
        node = node.with_creation_time(creation_time);
    }
    node.with_meta_info(specifics.meta_info_map())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictPolicy;
    use crate::types::{ModelTypeState, BOOKMARK_BAR_TAG, WINDOWS_EPOCH_DELTA_US};
    use marksync_model::{MemoryBookmarkModel, PermanentFolder};

    fn bar_update() -> UpdateResponseData {
        UpdateResponseData {
            entity: EntityData {
                id: "bar".into(),
                parent_id: BOOKMARKS_ROOT_ID.into(),
                server_defined_unique_tag: Some(BOOKMARK_BAR_TAG.into()),
                is_folder: true,
                specifics: Some(BookmarkSpecifics::folder("Bookmarks bar")),
                ..EntityData::default()
            },
            response_version: 0,
        }
    }

    fn url_update(id: &str, parent: &str, title: &str, url: &str) -> UpdateResponseData {
        UpdateResponseData {
            entity: EntityData {
                id: id.into(),
                parent_id: parent.into(),
                specifics: Some(BookmarkSpecifics::url(title, url)),
                ..EntityData::default()
            },
            response_version: 1,
        }
    }

    fn folder_update(id: &str, parent: &str, title: &str) -> UpdateResponseData {
        UpdateResponseData {
            entity: EntityData {
                id: id.into(),
                parent_id: parent.into(),
                is_folder: true,
                specifics: Some(BookmarkSpecifics::folder(title)),
                ..EntityData::default()
            },
            response_version: 1,
        }
    }

    fn tombstone(id: &str) -> UpdateResponseData {
        UpdateResponseData {
            entity: EntityData {
                id: id.into(),
                parent_id: "bar".into(),
                ..EntityData::default()
            },
            response_version: 2,
        }
    }

    fn apply(
        model: &mut MemoryBookmarkModel,
        tracker: &mut SyncedBookmarkTracker,
        config: &SyncConfig,
        updates: &[UpdateResponseData],
    ) -> ApplyReport {
        let mut deferred = Vec::new();
        UpdateReconciler::new(model, tracker, config, None).apply_batch(updates, &mut deferred)
    }

    fn setup() -> (MemoryBookmarkModel, SyncedBookmarkTracker, SyncConfig) {
        let mut model = MemoryBookmarkModel::new();
        let mut tracker = SyncedBookmarkTracker::new(ModelTypeState::default());
        let config = SyncConfig::default();
        apply(&mut model, &mut tracker, &config, &[bar_update()]);
        (model, tracker, config)
    }

    #[test]
    fn creates_children_in_order() {
        let (mut model, mut tracker, config) = setup();
        let report = apply(
            &mut model,
            &mut tracker,
            &config,
            &[
                url_update("n1", "bar", "title1", "http://www.url1.com"),
                url_update("n2", "bar", "title2", "http://www.url2.com"),
            ],
        );

        assert_eq!(report.created, 2);
        let bar = model.permanent_node(PermanentFolder::BookmarkBar);
        let titles: Vec<_> = model
            .children(bar)
            .iter()
            .map(|id| model.node(*id).unwrap().title.clone())
            .collect();
        assert_eq!(titles, vec!["title1", "title2"]);
        assert_eq!(tracker.tracked_entities_count(), 3);
    }

    #[test]
    fn creation_time_comes_from_specifics() {
        let (mut model, mut tracker, config) = setup();
        let mut update = url_update("n1", "bar", "t", "http://www.url.com");
        if let Some(specifics) = update.entity.specifics.as_mut() {
            specifics.creation_time_us = WINDOWS_EPOCH_DELTA_US + 42;
        }
        apply(&mut model, &mut tracker, &config, &[update]);

        let node = tracker.get_entity_for_sync_id("n1").unwrap().node().unwrap();
        assert_eq!(model.node(node).unwrap().creation_time, 42);
    }

    #[test]
    fn remote_changes_are_not_undoable() {
        let (mut model, mut tracker, config) = setup();
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        assert!(model.undo_history().is_empty());
        assert!(!model.is_undo_suspended());
        assert!(!model.in_extensive_changes());
    }

    #[test]
    fn invalid_and_orphaned_creates_are_dropped() {
        let (mut model, mut tracker, config) = setup();
        let report = apply(
            &mut model,
            &mut tracker,
            &config,
            &[
                url_update("bad", "bar", "t", "not a url"),
                url_update("orphan", "missing", "t", "http://www.url.com"),
            ],
        );
        assert_eq!(
            report.drop_reasons(),
            vec![DropReason::InvalidSpecifics, DropReason::MissingParent]
        );
        assert_eq!(tracker.tracked_entities_count(), 1);
        assert_eq!(report.deferred, 0);
    }

    #[test]
    fn deferred_orphans_land_with_their_parent() {
        let (mut model, mut tracker, _) = setup();
        let config = SyncConfig::default()
            .with_orphan_policy(OrphanPolicy::Defer)
            .with_reorder_strategy(crate::config::ReorderStrategy::PermanentFirst);
        let mut deferred = Vec::new();

        let report = UpdateReconciler::new(&mut model, &mut tracker, &config, None).apply_batch(
            &[url_update("child", "folder", "c", "http://c/")],
            &mut deferred,
        );
        assert_eq!(report.deferred, 1);
        assert!(report.is_clean());

        let report = UpdateReconciler::new(&mut model, &mut tracker, &config, None)
            .apply_batch(&[folder_update("folder", "bar", "f")], &mut deferred);
        assert_eq!(report.created, 2);
        assert!(deferred.is_empty());

        let folder = tracker.get_entity_for_sync_id("folder").unwrap().node().unwrap();
        assert_eq!(model.children(folder).len(), 1);
    }

    #[test]
    fn defer_limit_is_enforced() {
        let (mut model, mut tracker, _) = setup();
        let config = SyncConfig::default()
            .with_orphan_policy(OrphanPolicy::Defer)
            .with_max_deferred_updates(1);
        let mut deferred = Vec::new();

        let report = UpdateReconciler::new(&mut model, &mut tracker, &config, None).apply_batch(
            &[
                url_update("a", "missing", "a", "http://a/"),
                url_update("b", "missing", "b", "http://b/"),
            ],
            &mut deferred,
        );
        assert_eq!(report.deferred, 1);
        assert_eq!(report.drop_reasons(), vec![DropReason::DeferLimitExceeded]);
    }

    #[test]
    fn permanent_folder_updates_are_skipped() {
        let (mut model, mut tracker, config) = setup();
        let report = apply(&mut model, &mut tracker, &config, &[bar_update()]);
        assert_eq!(report.skipped_permanent, 1);

        let mut unknown = bar_update();
        unknown.entity.id = "x".into();
        unknown.entity.server_defined_unique_tag = Some("nope".into());
        let report = apply(&mut model, &mut tracker, &config, &[unknown]);
        assert_eq!(report.drop_reasons(), vec![DropReason::UnknownPermanentTag]);

        let mut second = bar_update();
        second.entity.id = "bar2".into();
        let report = apply(&mut model, &mut tracker, &config, &[second]);
        assert_eq!(report.drop_reasons(), vec![DropReason::AlreadyAssociated]);
    }

    #[test]
    fn kind_mismatch_is_dropped() {
        let (mut model, mut tracker, config) = setup();
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        let report = apply(&mut model, &mut tracker, &config, &[folder_update("n1", "bar", "f")]);
        assert_eq!(report.drop_reasons(), vec![DropReason::KindMismatch]);
    }

    #[test]
    fn server_wins_overrides_local_edit() {
        let (mut model, mut tracker, _) = setup();
        let config = SyncConfig::default().with_conflict_policy(ConflictPolicy::ServerWins);
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        tracker.increment_sequence_number("n1");

        let report = apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "remote", "http://www.url.com")],
        );
        assert_eq!(report.updated, 1);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(
            report.conflicts[0].resolution,
            Some(ConflictResolution::AcceptRemote)
        );
        assert!(!tracker.has_local_changes());

        let node = tracker.get_entity_for_sync_id("n1").unwrap().node().unwrap();
        assert_eq!(model.node(node).unwrap().title, "remote");
    }

    #[test]
    fn server_wins_restores_locally_deleted_entity() {
        let (mut model, mut tracker, _) = setup();
        let config = SyncConfig::default().with_conflict_policy(ConflictPolicy::ServerWins);
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        let node = tracker.get_entity_for_sync_id("n1").unwrap().node().unwrap();
        model.remove(node).unwrap();
        tracker.mark_deleted("n1", 0);

        let report = apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "back", "http://www.url.com")],
        );
        assert_eq!(report.created, 1);
        let entity = tracker.get_entity_for_sync_id("n1").unwrap();
        assert!(!entity.is_tombstone());
        assert_eq!(model.node(entity.node().unwrap()).unwrap().title, "back");
    }

    #[test]
    fn server_wins_keeps_local_edit_when_remote_kind_differs() {
        let (mut model, mut tracker, _) = setup();
        let config = SyncConfig::default().with_conflict_policy(ConflictPolicy::ServerWins);
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        let node = tracker.get_entity_for_sync_id("n1").unwrap().node().unwrap();
        model.set_title(node, "local edit").unwrap();
        tracker.increment_sequence_number("n1");

        let report = apply(&mut model, &mut tracker, &config, &[folder_update("n1", "bar", "f")]);
        assert_eq!(report.drop_reasons(), vec![DropReason::KindMismatch]);
        assert_eq!(report.updated, 0);
        assert!(tracker.has_local_changes());
        assert!(tracker.get_entity_for_sync_id("n1").unwrap().is_unsynced());
        assert_eq!(model.node(node).unwrap().title, "local edit");
    }

    #[test]
    fn server_wins_keeps_local_deletion_when_recreation_is_orphaned() {
        let (mut model, mut tracker, _) = setup();
        let config = SyncConfig::default().with_conflict_policy(ConflictPolicy::ServerWins);
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        let node = tracker.get_entity_for_sync_id("n1").unwrap().node().unwrap();
        model.remove(node).unwrap();
        tracker.mark_deleted("n1", 0);

        let report = apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "missing", "back", "http://www.url.com")],
        );
        assert_eq!(report.drop_reasons(), vec![DropReason::MissingParent]);
        assert_eq!(report.created, 0);
        let entity = tracker.get_entity_for_sync_id("n1").unwrap();
        assert!(entity.is_tombstone());
        assert!(entity.is_unsynced());
    }

    #[test]
    fn deferred_recreation_replaces_tombstone_once_parent_lands() {
        let (mut model, mut tracker, _) = setup();
        let config = SyncConfig::default()
            .with_conflict_policy(ConflictPolicy::ServerWins)
            .with_orphan_policy(OrphanPolicy::Defer);
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        let node = tracker.get_entity_for_sync_id("n1").unwrap().node().unwrap();
        model.remove(node).unwrap();
        tracker.mark_deleted("n1", 0);

        let mut deferred = Vec::new();
        let report = UpdateReconciler::new(&mut model, &mut tracker, &config, None).apply_batch(
            &[url_update("n1", "folder", "back", "http://www.url.com")],
            &mut deferred,
        );
        assert_eq!(report.deferred, 1);
        assert!(tracker.get_entity_for_sync_id("n1").unwrap().is_tombstone());

        let report = UpdateReconciler::new(&mut model, &mut tracker, &config, None)
            .apply_batch(&[folder_update("folder", "bar", "f")], &mut deferred);
        assert_eq!(report.created, 2);
        assert!(deferred.is_empty());
        let entity = tracker.get_entity_for_sync_id("n1").unwrap();
        assert!(!entity.is_tombstone());
        assert_eq!(model.node(entity.node().unwrap()).unwrap().title, "back");
    }

    #[test]
    fn failed_node_update_leaves_node_untouched() {
        let (mut model, mut tracker, config) = setup();
        let bar = model.permanent_node(PermanentFolder::BookmarkBar);
        let folder = model.add_folder(bar, 0, "f").unwrap();
        let specifics = BookmarkSpecifics::url("renamed", "http://www.url.com");

        let mut reconciler = UpdateReconciler::new(&mut model, &mut tracker, &config, None);
        assert!(matches!(
            reconciler.update_node(folder, false, &specifics),
            Err(ModelError::KindMismatch(_))
        ));
        assert!(matches!(
            reconciler.update_node(bar, true, &BookmarkSpecifics::folder("renamed")),
            Err(ModelError::PermanentNode(_))
        ));
        drop(reconciler);

        assert_eq!(model.node(folder).unwrap().title, "f");
        assert_ne!(model.node(bar).unwrap().title, "renamed");
    }

    #[test]
    fn deletion_of_tombstone_and_unknown() {
        let (mut model, mut tracker, config) = setup();
        apply(
            &mut model,
            &mut tracker,
            &config,
            &[url_update("n1", "bar", "t", "http://www.url.com")],
        );
        let node = tracker.get_entity_for_sync_id("n1").unwrap().node().unwrap();
        model.remove(node).unwrap();
        tracker.mark_deleted("n1", 0);

        let report = apply(
            &mut model,
            &mut tracker,
            &config,
            &[tombstone("n1"), tombstone("ghost")],
        );
        assert_eq!(report.deleted, 1);
        assert_eq!(report.drop_reasons(), vec![DropReason::UntrackedTombstone]);
        assert!(tracker.get_entity_for_sync_id("n1").is_none());
    }

    #[test]
    fn initial_merge_reuses_matching_nodes() {
        let mut model = MemoryBookmarkModel::new();
        let bar = model.permanent_node(PermanentFolder::BookmarkBar);
        let local = model.add_url(bar, 0, "t", "http://www.url.com").unwrap();
        let mut tracker = SyncedBookmarkTracker::default();
        let config = SyncConfig::default();
        let mut deferred = Vec::new();

        let report = UpdateReconciler::new(&mut model, &mut tracker, &config, None)
            .with_initial_merge(true)
            .apply_batch(
                &[
                    bar_update(),
                    url_update("n1", "bar", "t", "http://www.url.com"),
                    url_update("n2", "bar", "t", "http://www.other.com"),
                ],
                &mut deferred,
            );

        assert_eq!(report.merged, 1);
        assert_eq!(report.created, 1);
        assert_eq!(tracker.get_entity_for_sync_id("n1").unwrap().node(), Some(local));
        assert_eq!(model.children(bar).len(), 2);
    }
}
