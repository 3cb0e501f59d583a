//! Record store trait definition.

use crate::batch::{BatchOperation, WriteBatch};
use crate::error::StorageResult;
use std::collections::BTreeMap;

/// A stored entity payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Remote entity id.
    pub id: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

/// All sync metadata held by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataBatch {
    /// Per-entity metadata keyed by remote id.
    pub entities: BTreeMap<String, Vec<u8>>,
    /// The global sync state record, if one was written.
    pub global_state: Option<Vec<u8>>,
}

/// Durable storage for entity payloads and sync metadata.
///
/// # Invariants
///
/// - A committed batch is applied entirely or not at all
/// - Reads after a successful commit observe every operation in the batch
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`InMemoryRecordStore`](crate::InMemoryRecordStore)
/// - [`FileRecordStore`](crate::FileRecordStore)
pub trait RecordStore: Send + Sync {
    /// Reads every metadata record and the global state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_all_metadata(&self) -> StorageResult<MetadataBatch>;

    /// Reads the payloads for the given ids. Missing ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_data(&self, ids: &[String]) -> StorageResult<Vec<Record>>;

    /// Reads every payload, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn read_all_data(&self) -> StorageResult<Vec<Record>>;

    /// Creates an empty batch for this store.
    fn create_write_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Commits a batch atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. On error
    /// none of the batch's operations are visible.
    fn commit_write_batch(&self, batch: WriteBatch) -> StorageResult<()>;
}

/// In-memory view of a store's contents, shared by both implementations.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    pub(crate) data: BTreeMap<String, Vec<u8>>,
    pub(crate) metadata: BTreeMap<String, Vec<u8>>,
    pub(crate) global_state: Option<Vec<u8>>,
}

impl StoreState {
    pub(crate) fn apply(&mut self, batch: &WriteBatch) {
        for op in batch.operations() {
            match op {
                BatchOperation::WriteData { id, payload } => {
                    self.data.insert(id.clone(), payload.clone());
                }
                BatchOperation::DeleteData { id } => {
                    self.data.remove(id);
                }
                BatchOperation::WriteMetadata { id, metadata } => {
                    self.metadata.insert(id.clone(), metadata.clone());
                }
                BatchOperation::DeleteMetadata { id } => {
                    self.metadata.remove(id);
                }
                BatchOperation::WriteGlobalState { state } => {
                    self.global_state = Some(state.clone());
                }
                BatchOperation::DeleteGlobalState => {
                    self.global_state = None;
                }
            }
        }
    }

    pub(crate) fn metadata_batch(&self) -> MetadataBatch {
        MetadataBatch {
            entities: self.metadata.clone(),
            global_state: self.global_state.clone(),
        }
    }

    pub(crate) fn read_data(&self, ids: &[String]) -> Vec<Record> {
        ids.iter()
            .filter_map(|id| {
                self.data.get(id).map(|payload| Record {
                    id: id.clone(),
                    payload: payload.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn read_all_data(&self) -> Vec<Record> {
        self.data
            .iter()
            .map(|(id, payload)| Record {
                id: id.clone(),
                payload: payload.clone(),
            })
            .collect()
    }

    /// A single batch that recreates this state from empty.
    pub(crate) fn to_snapshot_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (id, payload) in &self.data {
            batch.write_data(id.clone(), payload.clone());
        }
        let mut changes = crate::MetadataChangeList::new();
        for (id, metadata) in &self.metadata {
            changes.update_metadata(id.clone(), metadata.clone());
        }
        if let Some(state) = &self.global_state {
            changes.update_global_state(state.clone());
        }
        batch.take_metadata_changes(changes);
        batch
    }
}
