//! # marksync storage
//!
//! Durable record store for marksync.
//!
//! The sync engine persists two kinds of records here: opaque per-entity
//! payloads (keyed by remote id) and sync metadata (one record per tracked
//! entity plus one global-state record). Stores do not interpret either;
//! the engine owns the encoding.
//!
//! ## Design Principles
//!
//! - Writes are grouped into a [`WriteBatch`] and committed all-or-nothing
//! - Reads never observe a partially applied batch
//! - Stores must be `Send + Sync`
//!
//! ## Available Stores
//!
//! - [`InMemoryRecordStore`] - For testing and ephemeral sessions
//! - [`FileRecordStore`] - Append-only batch log replayed on open
//!
//! ## Example
//!
//! ```rust
//! use marksync_storage::{InMemoryRecordStore, MetadataChangeList, RecordStore};
//!
//! let store = InMemoryRecordStore::new();
//! let mut changes = MetadataChangeList::new();
//! changes.update_metadata("server_id_1", vec![1, 2, 3]);
//!
//! let mut batch = store.create_write_batch();
//! batch.write_data("server_id_1", b"payload".to_vec());
//! batch.take_metadata_changes(changes);
//! store.commit_write_batch(batch).unwrap();
//!
//! let metadata = store.read_all_metadata().unwrap();
//! assert_eq!(metadata.entities.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod error;
mod file;
mod memory;
mod store;

pub use batch::{BatchOperation, GlobalStateChange, MetadataChange, MetadataChangeList, WriteBatch};
pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use file::FileRecordStore;
pub use memory::InMemoryRecordStore;
pub use store::{MetadataBatch, Record, RecordStore};
