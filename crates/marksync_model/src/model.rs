//! Bookmark tree contract.

use crate::error::ModelResult;
use crate::node::{BookmarkNode, MetaInfoMap, NewNode, NodeId, PermanentFolder};
use crate::observer::{BookmarkModelObserver, ObserverId};
use parking_lot::Mutex;
use std::sync::Arc;

/// A tree shared between its owner and the sync engine.
pub type SharedModel<M> = Arc<Mutex<M>>;

/// A mutable bookmark tree with stable node ids.
///
/// # Invariants
///
/// - Exactly one root with the three permanent folders as its children
/// - Every non-root node has exactly one parent, which is a folder
/// - Node ids are never reused
/// - Every successful mutation is reported to the registered observers
///   after it took effect
pub trait BookmarkModel: Send {
    /// Returns true once the tree has finished loading.
    fn is_loaded(&self) -> bool;

    /// Returns the root node id.
    fn root(&self) -> NodeId;

    /// Returns the id of a permanent folder.
    fn permanent_node(&self, folder: PermanentFolder) -> NodeId;

    /// Looks up a node.
    fn node(&self, id: NodeId) -> Option<&BookmarkNode>;

    /// Inserts a node at `index` below `parent`.
    ///
    /// # Errors
    ///
    /// Fails if the parent is missing or not a folder, the index is past
    /// the end, or a URL node has no URL.
    fn add_node(&mut self, parent: NodeId, index: usize, node: NewNode) -> ModelResult<NodeId>;

    /// Sets the title of a non-permanent node.
    ///
    /// # Errors
    ///
    /// Fails for unknown or permanent nodes.
    fn set_title(&mut self, id: NodeId, title: &str) -> ModelResult<()>;

    /// Sets the URL of a URL node.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes and folders.
    fn set_url(&mut self, id: NodeId, url: &str) -> ModelResult<()>;

    /// Replaces the metadata of a node.
    ///
    /// # Errors
    ///
    /// Fails for unknown nodes.
    fn set_meta_info_map(&mut self, id: NodeId, meta_info: MetaInfoMap) -> ModelResult<()>;

    /// Moves a node to `index` below `new_parent`.
    ///
    /// The index is interpreted after the node was detached from its old
    /// position.
    ///
    /// # Errors
    ///
    /// Fails for permanent nodes, non-folder parents, out of range indexes
    /// and moves into the node's own subtree.
    fn move_node(&mut self, id: NodeId, new_parent: NodeId, index: usize) -> ModelResult<()>;

    /// Reorders the children of a folder.
    ///
    /// # Errors
    ///
    /// Fails unless `order` is a permutation of the current children.
    fn reorder_children(&mut self, parent: NodeId, order: Vec<NodeId>) -> ModelResult<()>;

    /// Removes a non-permanent node and its subtree.
    ///
    /// # Errors
    ///
    /// Fails for unknown or permanent nodes.
    fn remove(&mut self, id: NodeId) -> ModelResult<()>;

    /// Starts a run of related mutations. Calls nest.
    fn begin_extensive_changes(&mut self);

    /// Ends a run of related mutations.
    fn end_extensive_changes(&mut self);

    /// Stops recording undo history. Calls nest.
    fn suspend_undo(&mut self);

    /// Resumes recording undo history.
    fn resume_undo(&mut self);

    /// Registers an observer.
    fn add_observer(&mut self, observer: Arc<dyn BookmarkModelObserver>) -> ObserverId;

    /// Unregisters an observer. Returns false if it was not registered.
    fn remove_observer(&mut self, id: ObserverId) -> bool;

    /// Returns true for the root and the permanent folders.
    fn is_permanent_node(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(BookmarkNode::is_permanent)
    }

    /// Returns the children of a node, empty if unknown.
    fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[][..], |node| node.children.as_slice())
    }

    /// Returns the number of edges between the node and the root.
    fn node_depth(&self, id: NodeId) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            depth += 1;
            current = self.node(parent)?;
        }
        Some(depth)
    }

    /// Returns true if `ancestor` is `id` or one of its ancestors.
    fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.node(node_id).and_then(|node| node.parent);
        }
        false
    }

    /// Returns every node in pre-order, starting with the root.
    fn nodes_preorder(&self) -> Vec<NodeId> {
        self.subtree_preorder(self.root())
    }

    /// Returns `id` and its descendants in pre-order.
    fn subtree_preorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(node) = self.node(next) else {
                continue;
            };
            out.push(next);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Convenience wrapper for appending a folder.
    ///
    /// # Errors
    ///
    /// See [`add_node`](Self::add_node).
    fn add_folder(&mut self, parent: NodeId, index: usize, title: &str) -> ModelResult<NodeId> {
        self.add_node(parent, index, NewNode::folder(title))
    }

    /// Convenience wrapper for adding a URL bookmark.
    ///
    /// # Errors
    ///
    /// See [`add_node`](Self::add_node).
    fn add_url(
        &mut self,
        parent: NodeId,
        index: usize,
        title: &str,
        url: &str,
    ) -> ModelResult<NodeId> {
        self.add_node(parent, index, NewNode::url(title, url))
    }
}
