//! Error types for bookmark tree operations.

use crate::node::NodeId;
use thiserror::Error;

/// Result type for tree operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors returned by tree mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The tree has not finished loading.
    #[error("bookmark model is not loaded")]
    NotLoaded,

    /// No node with this id exists.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// The target parent is not a folder.
    #[error("node {0} is not a folder")]
    NotAFolder(NodeId),

    /// The operation would modify a permanent node.
    #[error("node {0} is permanent and cannot be modified this way")]
    PermanentNode(NodeId),

    /// A child index was past the end of the parent's children.
    #[error("index {index} out of range for {len} children")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of children.
        len: usize,
    },

    /// The move would place a folder inside itself.
    #[error("cannot move node {node} into its own descendant {parent}")]
    InvalidMove {
        /// Node being moved.
        node: NodeId,
        /// Requested new parent.
        parent: NodeId,
    },

    /// A URL operation was attempted on a folder or a URL node was given no URL.
    #[error("node kind mismatch for {0}")]
    KindMismatch(NodeId),

    /// A reorder did not name exactly the parent's current children.
    #[error("reorder of {0} does not match its children")]
    InvalidReorder(NodeId),
}
