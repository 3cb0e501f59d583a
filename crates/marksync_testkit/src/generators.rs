//! Property-based test generators using proptest.
//!
//! Batches are built as valid trees below the bookmark bar and can then be
//! shuffled, so every strategy keeps parent references resolvable.

use crate::fixtures::{create_tombstone, create_update_data, BookmarkInfo, BOOKMARK_BAR_ID};
use marksync_engine::UpdateResponseData;
use proptest::prelude::*;
use proptest::sample::Index;

/// Strategy for bookmark titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{1,16}").expect("Invalid regex")
}

/// Strategy for valid URLs.
pub fn url_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("http://www\\.[a-z]{1,8}\\.com/[a-z0-9]{0,6}")
        .expect("Invalid regex")
}

/// Strategy for one node description: folder flag, parent pick, title, URL.
fn node_spec_strategy() -> impl Strategy<Value = (bool, Index, String, String)> {
    (any::<bool>(), any::<Index>(), title_strategy(), url_strategy())
}

/// Strategy for a tree of remote bookmarks below the bookmark bar.
///
/// Ids are `node_0`, `node_1`, and so on; every parent precedes its
/// children. The bookmark bar itself is not included.
pub fn bookmark_tree_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<BookmarkInfo>> {
    prop::collection::vec(node_spec_strategy(), 1..=max_nodes.max(1)).prop_map(|specs| {
        let mut folders = vec![BOOKMARK_BAR_ID.to_string()];
        let mut infos = Vec::with_capacity(specs.len());
        for (i, (is_folder, parent, title, url)) in specs.into_iter().enumerate() {
            let id = format!("node_{i}");
            let parent = folders[parent.index(folders.len())].clone();
            if is_folder {
                infos.push(BookmarkInfo::folder(&id, &title, &parent));
                folders.push(id);
            } else {
                infos.push(BookmarkInfo::url(&id, &title, &url, &parent));
            }
        }
        infos
    })
}

/// Strategy for a full first batch (bookmark bar plus a tree) in any order.
pub fn shuffled_batch_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<UpdateResponseData>> {
    bookmark_tree_strategy(max_nodes).prop_flat_map(|infos| {
        let mut updates = vec![create_update_data(&BookmarkInfo::bookmark_bar())];
        updates.extend(infos.iter().map(create_update_data));
        Just(updates).prop_shuffle()
    })
}

/// Strategy for a batch mixing creates and deletions, in any order.
pub fn mixed_batch_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<UpdateResponseData>> {
    (
        bookmark_tree_strategy(max_nodes),
        prop::collection::vec(any::<Index>(), 0..=max_nodes),
    )
        .prop_flat_map(|(infos, deletions)| {
            let mut updates: Vec<_> = infos.iter().map(create_update_data).collect();
            updates.extend(
                deletions
                    .iter()
                    .map(|index| create_tombstone(&infos[index.index(infos.len())].server_id)),
            );
            updates.push(create_update_data(&BookmarkInfo::bookmark_bar()));
            Just(updates).prop_shuffle()
        })
}
