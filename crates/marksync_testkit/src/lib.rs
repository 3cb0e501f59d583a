//! # marksync testkit
//!
//! Test utilities for marksync.
//!
//! This crate provides:
//! - A harness wiring a tree, a processor and a mock commit queue
//! - Builders for inbound update records
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use marksync_testkit::prelude::*;
//!
//! let harness = SyncTestHarness::new();
//! init_with_synced_bookmarks(
//!     &harness,
//!     &[BookmarkInfo::url("n1", "title", TEST_URL, BOOKMARK_BAR_ID)],
//! );
//! assert_eq!(harness.child_titles(harness.bookmark_bar()), vec!["title"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
