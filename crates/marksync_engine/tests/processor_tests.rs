//! Processor behavior against an in-memory tree.

use marksync_engine::{
    reorder_updates, BookmarkModelMetadata, BookmarkMetadata, EntityMetadata, ModelTypeState,
    ReorderStrategy,
};
use marksync_model::{BookmarkModel, NodeId};
use marksync_testkit::prelude::*;

#[test]
fn reorder_ignores_root_nodes() {
    let updates = vec![create_root_update()];
    for strategy in [ReorderStrategy::PermanentFirst, ReorderStrategy::Topological] {
        assert!(reorder_updates(&updates, strategy, |_| None).is_empty());
    }
}

#[test]
fn reorder_places_permanent_nodes_first() {
    let updates = vec![
        create_update_data(&BookmarkInfo::folder("node1", "", "node2")),
        create_update_data(&BookmarkInfo {
            server_id: "node2".into(),
            ..BookmarkInfo::bookmark_bar()
        }),
    ];
    let ordered = reorder_updates(&updates, ReorderStrategy::PermanentFirst, |_| None);

    assert_eq!(ordered.len(), 2);
    assert_eq!(ordered[0].entity.id, "node2");
    assert_eq!(ordered[1].entity.id, "node1");
}

#[test]
fn remote_creation_updates_model() {
    let harness = SyncTestHarness::new();
    let bar = harness.bookmark_bar();
    assert!(harness.model.lock().children(bar).is_empty());

    harness.apply(vec![
        create_update_data(&BookmarkInfo::bookmark_bar()),
        create_update_data(&BookmarkInfo::url("node_id", "title", TEST_URL, BOOKMARK_BAR_ID)),
    ]);

    let model = harness.model.lock();
    let child = model.node(model.children(bar)[0]).unwrap();
    assert_eq!(child.title, "title");
    assert_eq!(child.url.as_deref(), Some(TEST_URL));
    drop(model);
    // The tree saves itself after mutations.
    assert_eq!(harness.save_count(), 0);
}

#[test]
fn remote_update_updates_model() {
    let harness = SyncTestHarness::new();
    init_with_synced_bookmarks(
        &harness,
        &[BookmarkInfo::url("node_id", "title", TEST_URL, BOOKMARK_BAR_ID)],
    );
    let bar = harness.bookmark_bar();
    let node = harness.model.lock().children(bar)[0];

    harness.apply(vec![create_update_data(&BookmarkInfo::url(
        "node_id",
        "new-title",
        "http://www.new-url.com",
        BOOKMARK_BAR_ID,
    ))]);

    let model = harness.model.lock();
    assert_eq!(model.children(bar), &[node]);
    let node = model.node(node).unwrap();
    assert_eq!(node.title, "new-title");
    assert_eq!(node.url.as_deref(), Some("http://www.new-url.com"));
    drop(model);
    assert_eq!(harness.save_count(), 0);
}

#[test]
fn metadata_only_update_schedules_save() {
    let harness = SyncTestHarness::new();
    let info = BookmarkInfo::url("node_id", "title", TEST_URL, BOOKMARK_BAR_ID);
    init_with_synced_bookmarks(&harness, &[info.clone()]);

    let mut update = create_update_data(&info);
    update.response_version += 1;
    let report = harness.apply(vec![update]);

    assert_eq!(report.metadata_only, 1);
    assert_eq!(harness.save_count(), 1);
    let version = harness.processor.with_tracker(|t| {
        t.get_entity_for_sync_id("node_id")
            .map(|e| e.metadata().server_version)
    });
    assert_eq!(version, Some(Some(1)));
}

#[test]
fn remote_delete_updates_model() {
    // bookmark_bar
    //  |- folder1
    //      |- title1
    //      |- title2
    //  |- folder2
    //      |- title3
    let harness = SyncTestHarness::new();
    init_with_synced_bookmarks(
        &harness,
        &[
            BookmarkInfo::folder("folder1Id", "folder1", BOOKMARK_BAR_ID),
            BookmarkInfo::url("title1Id", "title1", TEST_URL, "folder1Id"),
            BookmarkInfo::url("title2Id", "title2", TEST_URL, "folder1Id"),
            BookmarkInfo::folder("folder2Id", "folder2", BOOKMARK_BAR_ID),
            BookmarkInfo::url("title3Id", "title3", TEST_URL, "folder2Id"),
        ],
    );
    let bar = harness.bookmark_bar();
    assert_eq!(harness.child_titles(bar), vec!["folder1", "folder2"]);

    // The parent arrives before its children.
    let report = harness.apply(vec![
        create_tombstone("title2Id"),
        create_tombstone("title1Id"),
        create_tombstone("folder1Id"),
    ]);
    assert!(report.is_clean());
    assert_eq!(report.deleted, 3);

    assert_eq!(harness.child_titles(bar), vec!["folder2"]);
    let folder2 = harness.node_for("folder2Id").unwrap();
    assert_eq!(harness.child_titles(folder2), vec!["title3"]);
    assert_eq!(harness.save_count(), 0);
    harness.assert_consistent();
}

#[test]
fn encode_sync_metadata() {
    let harness = SyncTestHarness::new();
    init_with_synced_bookmarks(
        &harness,
        &[
            BookmarkInfo::url("node_id1", "title1", "http://www.url1.com", BOOKMARK_BAR_ID),
            BookmarkInfo::url("node_id2", "title2", "http://www.url2.com", BOOKMARK_BAR_ID),
        ],
    );
    let bar = harness.bookmark_bar();
    let (node1, node2) = {
        let model = harness.model.lock();
        (model.children(bar)[0], model.children(bar)[1])
    };

    let blob = harness.processor.encode_sync_metadata().unwrap();
    let metadata = BookmarkModelMetadata::from_bytes(&blob).unwrap();
    let entries: Vec<_> = metadata
        .bookmarks_metadata
        .iter()
        .map(|entry| (entry.id, entry.metadata.server_id.as_str(), entry.metadata.is_deleted))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Some(bar), BOOKMARK_BAR_ID, false),
            (Some(node1), "node_id1", false),
            (Some(node2), "node_id2", false),
        ]
    );

    harness.apply(vec![create_tombstone("node_id1")]);
    let blob = harness.processor.encode_sync_metadata().unwrap();
    let metadata = BookmarkModelMetadata::from_bytes(&blob).unwrap();
    assert_eq!(metadata.bookmarks_metadata.len(), 2);
    assert_eq!(metadata.bookmarks_metadata[1].id, Some(node2));
    assert_eq!(metadata.bookmarks_metadata[1].metadata.server_id, "node_id2");
}

#[test]
fn decode_sync_metadata() {
    let harness = SyncTestHarness::new();
    let bar = harness.bookmark_bar();
    let node = harness
        .model
        .lock()
        .add_url(bar, 0, "title1", "http://www.url1.com")
        .unwrap();

    let record = |id, server_id: &str| BookmarkMetadata {
        id: Some(id),
        metadata: EntityMetadata {
            server_id: server_id.to_string(),
            ..EntityMetadata::default()
        },
    };
    let metadata = BookmarkModelMetadata {
        model_type_state: ModelTypeState {
            initial_sync_done: true,
            ..ModelTypeState::default()
        },
        bookmarks_metadata: vec![record(bar, BOOKMARK_BAR_ID), record(node, "node_id1")],
        ..BookmarkModelMetadata::default()
    };

    let processor = harness.restart(&metadata.to_bytes().unwrap());
    assert_state(
        &processor,
        &harness.model,
        &[BookmarkInfo::url("node_id1", "title1", "http://www.url1.com", BOOKMARK_BAR_ID)],
    );
}

#[test]
fn decode_skips_invalid_entries() {
    let harness = SyncTestHarness::new();
    let bar = harness.bookmark_bar();

    let entry = |id, server_id: &str, is_deleted| BookmarkMetadata {
        id,
        metadata: EntityMetadata {
            server_id: server_id.to_string(),
            is_deleted,
            ..EntityMetadata::default()
        },
    };
    let metadata = BookmarkModelMetadata {
        model_type_state: ModelTypeState {
            initial_sync_done: true,
            ..ModelTypeState::default()
        },
        bookmarks_metadata: vec![
            entry(Some(bar), BOOKMARK_BAR_ID, false),
            entry(Some(bar), "tombstone_with_id", true),
            entry(None, "live_without_id", false),
            entry(Some(NodeId(999)), "missing_node", false),
            entry(None, "tombstone", true),
        ],
        ..BookmarkModelMetadata::default()
    };

    let processor = harness.restart(&metadata.to_bytes().unwrap());
    let ids = processor
        .with_tracker(|t| {
            let mut ids: Vec<_> = t.entities().map(|e| e.sync_id().to_string()).collect();
            ids.sort();
            ids
        })
        .unwrap();
    assert_eq!(ids, vec![BOOKMARK_BAR_ID.to_string(), "tombstone".to_string()]);
}

#[test]
fn decode_encoded_sync_metadata() {
    let harness = SyncTestHarness::new();
    let bookmarks = [
        BookmarkInfo::url("node_id1", "title1", "http://www.url1.com", BOOKMARK_BAR_ID),
        BookmarkInfo::url("node_id2", "title2", "http://www.url2.com", BOOKMARK_BAR_ID),
    ];
    init_with_synced_bookmarks(&harness, &bookmarks);

    let blob = harness.processor.encode_sync_metadata().unwrap();
    let processor = harness.restart(&blob);
    assert_state(&processor, &harness.model, &bookmarks);
}

#[test]
fn decode_adopts_nodes_missing_from_metadata() {
    let harness = SyncTestHarness::new();
    init_with_synced_bookmarks(
        &harness,
        &[BookmarkInfo::folder("folder", "folder", BOOKMARK_BAR_ID)],
    );
    let blob = harness.processor.encode_sync_metadata().unwrap();

    // Added after the blob was written, so the blob does not know it.
    let folder = harness.node_for("folder").unwrap();
    let added = harness
        .model
        .lock()
        .add_url(folder, 0, "added", TEST_URL)
        .unwrap();

    let processor = harness.restart(&blob);
    let unsynced = processor
        .with_tracker(|t| t.get_entity_for_node(added).map(|e| e.is_unsynced()))
        .flatten();
    assert_eq!(unsynced, Some(true));
}
