//! Property tests over generated batches.

use marksync_engine::{
    reorder_updates, BookmarkSpecifics, ModelTypeState, ReorderStrategy, SyncedBookmarkTracker,
    BOOKMARKS_ROOT_ID,
};
use marksync_model::{BookmarkModel, NodeId};
use marksync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn strategies() -> [ReorderStrategy; 2] {
    [ReorderStrategy::PermanentFirst, ReorderStrategy::Topological]
}

fn hashes(harness: &SyncTestHarness) -> BTreeMap<String, Vec<u8>> {
    harness
        .processor
        .with_tracker(|t| {
            t.entities()
                .map(|e| (e.sync_id().to_string(), e.metadata().specifics_hash.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn pairs(harness: &SyncTestHarness) -> BTreeMap<String, Option<NodeId>> {
    harness
        .processor
        .with_tracker(|t| t.entities().map(|e| (e.sync_id().to_string(), e.node())).collect())
        .unwrap_or_default()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reapplying_a_batch_is_idempotent(batch in shuffled_batch_strategy(12)) {
        let harness = SyncTestHarness::new();
        let first = harness.apply(batch.clone());
        prop_assert!(first.is_clean(), "dropped: {:?}", first.dropped);
        let nodes = harness.model.lock().nodes_preorder().len();
        let before = hashes(&harness);

        let second = harness.apply(batch);

        prop_assert_eq!(second.created, 0);
        prop_assert_eq!(harness.model.lock().nodes_preorder().len(), nodes);
        prop_assert_eq!(hashes(&harness), before);
        harness.assert_consistent();
    }

    #[test]
    fn permanent_folders_precede_their_children(batch in shuffled_batch_strategy(12)) {
        for strategy in strategies() {
            let ordered = reorder_updates(&batch, strategy, |_| None);
            let bar = ordered
                .iter()
                .position(|u| u.entity.id == BOOKMARK_BAR_ID)
                .unwrap();
            for (i, update) in ordered.iter().enumerate() {
                if update.entity.parent_id == BOOKMARK_BAR_ID {
                    prop_assert!(bar < i);
                }
            }
            prop_assert_eq!(ordered[0].entity.parent_id.as_str(), BOOKMARKS_ROOT_ID);
        }
    }

    #[test]
    fn deletions_come_last(batch in mixed_batch_strategy(10)) {
        for strategy in strategies() {
            let ordered = reorder_updates(&batch, strategy, |_| None);
            prop_assert_eq!(ordered.len(), batch.len());
            let first_deletion = ordered
                .iter()
                .position(|u| u.entity.is_deleted())
                .unwrap_or(ordered.len());
            prop_assert!(ordered[first_deletion..].iter().all(|u| u.entity.is_deleted()));
        }
    }

    #[test]
    fn topological_order_places_parents_first(batch in shuffled_batch_strategy(12)) {
        let ordered = reorder_updates(&batch, ReorderStrategy::Topological, |_| None);
        let mut seen = std::collections::HashSet::from([BOOKMARKS_ROOT_ID.to_string()]);
        for update in ordered {
            prop_assert!(seen.contains(&update.entity.parent_id), "{} before its parent", update.entity.id);
            seen.insert(update.entity.id.clone());
        }
    }

    #[test]
    fn tracker_matches_tree_after_any_batch(
        first in shuffled_batch_strategy(10),
        second in mixed_batch_strategy(10),
    ) {
        let harness = SyncTestHarness::new();
        harness.apply(first);
        harness.assert_consistent();
        harness.apply(second);
        harness.assert_consistent();
    }

    #[test]
    fn local_changes_last_until_acknowledged(edits in 1i64..8) {
        let mut tracker = SyncedBookmarkTracker::new(ModelTypeState::default());
        tracker.add("n1", NodeId(7), 1, 0, &BookmarkSpecifics::url("title", TEST_URL));
        prop_assert!(!tracker.has_local_changes());

        for edit in 1..=edits {
            tracker.increment_sequence_number("n1");
            prop_assert!(tracker.has_local_changes());
            if edit < edits {
                tracker.update_upon_commit_response("n1", 1 + edit, edit - 1);
                prop_assert!(tracker.has_local_changes());
            }
        }

        tracker.update_upon_commit_response("n1", 10, edits);
        prop_assert!(!tracker.has_local_changes());
    }

    #[test]
    fn metadata_roundtrip_preserves_tracking(batch in shuffled_batch_strategy(12)) {
        let harness = SyncTestHarness::new();
        harness.apply(batch);
        let blob = harness.processor.encode_sync_metadata().unwrap();

        let restored = harness.restart(&blob);
        let restored_pairs: BTreeMap<_, _> = restored
            .with_tracker(|t| t.entities().map(|e| (e.sync_id().to_string(), e.node())).collect())
            .unwrap_or_default();
        prop_assert_eq!(restored_pairs, pairs(&harness));
    }
}
