//! Tree mutation notifications.

use crate::node::{BookmarkNode, NodeId};

/// Handle returned by [`BookmarkModel::add_observer`](crate::BookmarkModel::add_observer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// A single mutation of the tree, emitted after it took effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeChange {
    /// A node was inserted.
    Added {
        /// Snapshot of the new node.
        node: BookmarkNode,
    },
    /// A node and its subtree were removed.
    Removed {
        /// Snapshot of the removed node.
        node: BookmarkNode,
        /// Former parent.
        parent: NodeId,
        /// Former position within the parent.
        index: usize,
        /// Every removed descendant, in pre-order.
        descendants: Vec<NodeId>,
    },
    /// Title, URL or metadata of a node changed.
    Changed {
        /// Snapshot after the change.
        node: BookmarkNode,
    },
    /// A node moved to another position or parent.
    Moved {
        /// The moved node.
        node: NodeId,
        /// Parent before the move.
        old_parent: NodeId,
        /// Parent after the move.
        new_parent: NodeId,
        /// Position within the new parent.
        new_index: usize,
    },
    /// The children of a folder were reordered in place.
    ChildrenReordered {
        /// The folder.
        parent: NodeId,
        /// Children in their new order.
        children: Vec<NodeId>,
    },
}

impl NodeChange {
    /// Returns the node the change is about.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        match self {
            NodeChange::Added { node }
            | NodeChange::Removed { node, .. }
            | NodeChange::Changed { node } => node.id,
            NodeChange::Moved { node, .. } => *node,
            NodeChange::ChildrenReordered { parent, .. } => *parent,
        }
    }
}

/// Receives tree notifications.
///
/// Observers are called synchronously from inside the mutating call, so
/// they must not call back into the tree.
pub trait BookmarkModelObserver: Send + Sync {
    /// The tree finished loading.
    fn model_loaded(&self) {}

    /// A run of related mutations begins.
    fn extensive_changes_began(&self) {}

    /// A run of related mutations ended.
    fn extensive_changes_ended(&self) {}

    /// A node changed.
    fn on_node_change(&self, change: &NodeChange);
}
