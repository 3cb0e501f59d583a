//! # marksync model
//!
//! The bookmark tree consumed by the marksync engine.
//!
//! This crate provides:
//! - [`BookmarkModel`], the contract the engine reads and mutates
//! - [`BookmarkModelObserver`], the single capability through which tree
//!   mutations are reported
//! - [`MemoryBookmarkModel`], an in-memory tree for hosts and tests
//!
//! Every tree has one root and three permanent folders below it
//! (bookmark bar, other bookmarks, mobile bookmarks). Permanent folders
//! cannot be removed, moved or renamed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod model;
mod node;
mod observer;

pub use error::{ModelError, ModelResult};
pub use memory::MemoryBookmarkModel;
pub use model::{BookmarkModel, SharedModel};
pub use node::{BookmarkNode, MetaInfoMap, NewNode, NodeId, NodeKind, PermanentFolder};
pub use observer::{BookmarkModelObserver, NodeChange, ObserverId};
