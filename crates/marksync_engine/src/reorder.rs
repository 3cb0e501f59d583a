//! Ordering of inbound update batches.
//!
//! Records arrive in arbitrary order. Before they are applied, the batch
//! is sequenced so that permanent folders are associated before anything
//! else, parents are created before their children, and deletions run
//! last.

use crate::config::ReorderStrategy;
use crate::types::{UpdateResponseData, BOOKMARKS_ROOT_ID, ROOT_PARENT_ID};
use std::collections::HashMap;

/// Returns the records of `updates` in application order.
///
/// Records whose parent is the collection root sentinel describe the type
/// root itself and are dropped. `local_depth` reports the tree depth of the
/// node tracked under a server id; it orders deletions under
/// [`ReorderStrategy::Topological`].
pub fn reorder_updates<'a>(
    updates: &'a [UpdateResponseData],
    strategy: ReorderStrategy,
    local_depth: impl Fn(&str) -> Option<usize>,
) -> Vec<&'a UpdateResponseData> {
    match strategy {
        ReorderStrategy::PermanentFirst => permanent_first(updates),
        ReorderStrategy::Topological => topological(updates, local_depth),
    }
}

fn permanent_first(updates: &[UpdateResponseData]) -> Vec<&UpdateResponseData> {
    let mut ordered = Vec::with_capacity(updates.len());
    ordered.extend(
        updates
            .iter()
            .filter(|u| u.entity.parent_id == BOOKMARKS_ROOT_ID),
    );
    ordered.extend(
        updates
            .iter()
            .filter(|u| is_regular(u) && !u.entity.is_deleted()),
    );
    ordered.extend(
        updates
            .iter()
            .filter(|u| is_regular(u) && u.entity.is_deleted()),
    );
    ordered
}

fn is_regular(update: &UpdateResponseData) -> bool {
    update.entity.parent_id != ROOT_PARENT_ID && update.entity.parent_id != BOOKMARKS_ROOT_ID
}

fn topological<'a>(
    updates: &'a [UpdateResponseData],
    local_depth: impl Fn(&str) -> Option<usize>,
) -> Vec<&'a UpdateResponseData> {
    let mut ordered = Vec::with_capacity(updates.len());
    ordered.extend(updates.iter().filter(|u| {
        !u.entity.is_deleted() && u.entity.parent_id == BOOKMARKS_ROOT_ID
    }));

    let creates: Vec<usize> = updates
        .iter()
        .enumerate()
        .filter(|(_, u)| !u.entity.is_deleted() && is_regular(u))
        .map(|(i, _)| i)
        .collect();

    let mut first_index: HashMap<&str, usize> = HashMap::new();
    for &i in &creates {
        first_index.entry(updates[i].entity.id.as_str()).or_insert(i);
    }

    let mut emitted = vec![false; updates.len()];
    for &start in &creates {
        if emitted[start] {
            continue;
        }

        let mut chain = vec![start];
        let mut cycle = false;
        let mut current = start;
        while let Some(&parent) = first_index.get(updates[current].entity.parent_id.as_str()) {
            if emitted[parent] {
                break;
            }
            if chain.contains(&parent) {
                cycle = true;
                break;
            }
            chain.push(parent);
            current = parent;
        }

        if cycle {
            tracing::warn!(
                id = %updates[start].entity.id,
                "parent cycle in update batch; keeping arrival order"
            );
            chain.sort_unstable();
        } else {
            chain.reverse();
        }
        for i in chain {
            emitted[i] = true;
            ordered.push(&updates[i]);
        }
    }

    let mut deletions: Vec<(Option<usize>, &UpdateResponseData)> = updates
        .iter()
        .filter(|u| u.entity.is_deleted() && u.entity.parent_id != ROOT_PARENT_ID)
        .map(|u| (local_depth(&u.entity.id), u))
        .collect();
    // Deepest first; unknown depth last.
    deletions.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    ordered.extend(deletions.into_iter().map(|(_, u)| u));
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookmarkSpecifics, EntityData, BOOKMARK_BAR_TAG};
    use proptest::prelude::*;

    fn update(id: &str, parent: &str, deleted: bool) -> UpdateResponseData {
        UpdateResponseData {
            entity: EntityData {
                id: id.into(),
                parent_id: parent.into(),
                specifics: (!deleted).then(|| BookmarkSpecifics::folder(id)),
                is_folder: true,
                ..EntityData::default()
            },
            response_version: 0,
        }
    }

    fn ids(ordered: &[&UpdateResponseData]) -> Vec<String> {
        ordered.iter().map(|u| u.entity.id.clone()).collect()
    }

    fn no_depth(_: &str) -> Option<usize> {
        None
    }

    #[test]
    fn ignores_root_nodes() {
        let mut root = update("root", ROOT_PARENT_ID, false);
        root.entity.server_defined_unique_tag = Some("google_chrome_bookmarks".into());
        let mut bar = update("bar", BOOKMARKS_ROOT_ID, false);
        bar.entity.server_defined_unique_tag = Some(BOOKMARK_BAR_TAG.into());
        let updates = vec![root, bar, update("n1", "bar", false)];

        for strategy in [ReorderStrategy::PermanentFirst, ReorderStrategy::Topological] {
            let ordered = reorder_updates(&updates, strategy, no_depth);
            assert_eq!(ids(&ordered), vec!["bar", "n1"]);
        }
    }

    #[test]
    fn permanent_first_buckets() {
        let updates = vec![
            update("d1", "f1", true),
            update("n1", "bar", false),
            update("bar", BOOKMARKS_ROOT_ID, false),
            update("d2", "f2", true),
            update("n2", "f1", false),
        ];
        let ordered = reorder_updates(&updates, ReorderStrategy::PermanentFirst, no_depth);
        assert_eq!(ids(&ordered), vec!["bar", "n1", "n2", "d1", "d2"]);
    }

    #[test]
    fn permanent_first_keeps_arrival_order_for_nesting() {
        let updates = vec![
            update("child", "folder", false),
            update("folder", "bar", false),
        ];
        let ordered = reorder_updates(&updates, ReorderStrategy::PermanentFirst, no_depth);
        assert_eq!(ids(&ordered), vec!["child", "folder"]);
    }

    #[test]
    fn topological_places_parents_first() {
        let updates = vec![
            update("grandchild", "child", false),
            update("other", "bar", false),
            update("child", "folder", false),
            update("folder", "bar", false),
            update("bar", BOOKMARKS_ROOT_ID, false),
        ];
        let ordered = reorder_updates(&updates, ReorderStrategy::Topological, no_depth);
        assert_eq!(
            ids(&ordered),
            vec!["bar", "folder", "child", "grandchild", "other"]
        );
    }

    #[test]
    fn topological_survives_cycles() {
        let updates = vec![update("a", "b", false), update("b", "a", false)];
        let ordered = reorder_updates(&updates, ReorderStrategy::Topological, no_depth);
        assert_eq!(ids(&ordered), vec!["a", "b"]);
    }

    #[test]
    fn deletions_deepest_first() {
        let updates = vec![
            update("f1", "bar", true),
            update("unknown", "bar", true),
            update("c1", "f1", true),
            update("n1", "bar", false),
        ];
        let depth = |id: &str| match id {
            "f1" => Some(2),
            "c1" => Some(3),
            _ => None,
        };
        let ordered = reorder_updates(&updates, ReorderStrategy::Topological, depth);
        assert_eq!(ids(&ordered), vec!["n1", "c1", "f1", "unknown"]);
    }

    fn batch_strategy() -> impl Strategy<Value = Vec<UpdateResponseData>> {
        prop::collection::vec((0usize..12, 0usize..12, any::<bool>()), 0..24).prop_map(|specs| {
            let mut updates = vec![update("bar", BOOKMARKS_ROOT_ID, false)];
            for (i, (id, parent, deleted)) in specs.into_iter().enumerate() {
                let parent = if parent == 0 {
                    "bar".to_string()
                } else {
                    format!("n{parent}")
                };
                updates.insert(i % (updates.len() + 1), update(&format!("n{id}"), &parent, deleted));
            }
            updates
        })
    }

    proptest! {
        #[test]
        fn permanent_folders_first_and_deletions_last(updates in batch_strategy()) {
            for strategy in [ReorderStrategy::PermanentFirst, ReorderStrategy::Topological] {
                let ordered = reorder_updates(&updates, strategy, no_depth);
                prop_assert_eq!(ordered.len(), updates.len());
                prop_assert_eq!(ordered[0].entity.id.as_str(), "bar");

                let first_deletion = ordered
                    .iter()
                    .position(|u| u.entity.is_deleted())
                    .unwrap_or(ordered.len());
                prop_assert!(ordered[first_deletion..].iter().all(|u| u.entity.is_deleted()));
            }
        }

        #[test]
        fn topological_parent_before_child(updates in batch_strategy()) {
            let ordered = reorder_updates(&updates, ReorderStrategy::Topological, no_depth);
            let position = |id: &str| {
                ordered
                    .iter()
                    .position(|u| u.entity.id == id && !u.entity.is_deleted())
            };
            for (i, u) in ordered.iter().enumerate() {
                if u.entity.is_deleted() {
                    continue;
                }
                if let Some(parent) = position(&u.entity.parent_id) {
                    // Cycles are the only case where a parent may follow.
                    let mut seen = vec![u.entity.id.clone()];
                    let mut cursor = u.entity.parent_id.clone();
                    let mut cyclic = false;
                    while let Some(p) = updates
                        .iter()
                        .find(|x| x.entity.id == cursor && !x.entity.is_deleted())
                    {
                        if seen.contains(&p.entity.id) {
                            cyclic = true;
                            break;
                        }
                        seen.push(p.entity.id.clone());
                        cursor = p.entity.parent_id.clone();
                    }
                    prop_assert!(cyclic || parent < i);
                }
            }
        }
    }
}
