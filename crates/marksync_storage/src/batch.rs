//! Write batches and metadata change lists.

use serde::{Deserialize, Serialize};

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOperation {
    /// Store (or overwrite) the payload for an entity.
    WriteData {
        /// Remote entity id.
        id: String,
        /// Serialized payload.
        payload: Vec<u8>,
    },
    /// Remove the payload for an entity.
    DeleteData {
        /// Remote entity id.
        id: String,
    },
    /// Store (or overwrite) the sync metadata for an entity.
    WriteMetadata {
        /// Remote entity id.
        id: String,
        /// Serialized metadata.
        metadata: Vec<u8>,
    },
    /// Remove the sync metadata for an entity.
    DeleteMetadata {
        /// Remote entity id.
        id: String,
    },
    /// Replace the global sync state record.
    WriteGlobalState {
        /// Serialized global state.
        state: Vec<u8>,
    },
    /// Remove the global sync state record.
    DeleteGlobalState,
}

/// A pending change to one entity's metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataChange {
    /// The entity's metadata was written.
    Update {
        /// Remote entity id.
        id: String,
        /// Serialized metadata.
        metadata: Vec<u8>,
    },
    /// The entity is no longer tracked.
    Clear {
        /// Remote entity id.
        id: String,
    },
}

/// A pending change to the global sync state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalStateChange {
    /// Replace the record.
    Update(Vec<u8>),
    /// Remove the record.
    Clear,
}

/// Metadata changes accumulated by the engine before a commit.
///
/// A change list is handed to a [`WriteBatch`] with
/// [`WriteBatch::take_metadata_changes`], which consumes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataChangeList {
    changes: Vec<MetadataChange>,
    global_state: Option<GlobalStateChange>,
}

impl MetadataChangeList {
    /// Creates an empty change list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records new metadata for an entity.
    pub fn update_metadata(&mut self, id: impl Into<String>, metadata: Vec<u8>) {
        self.changes.push(MetadataChange::Update {
            id: id.into(),
            metadata,
        });
    }

    /// Records that an entity's metadata must be removed.
    pub fn clear_metadata(&mut self, id: impl Into<String>) {
        self.changes.push(MetadataChange::Clear { id: id.into() });
    }

    /// Records a new global sync state. Later calls win.
    pub fn update_global_state(&mut self, state: Vec<u8>) {
        self.global_state = Some(GlobalStateChange::Update(state));
    }

    /// Records that the global sync state must be removed.
    pub fn clear_global_state(&mut self) {
        self.global_state = Some(GlobalStateChange::Clear);
    }

    /// Returns the per-entity changes in insertion order.
    pub fn changes(&self) -> &[MetadataChange] {
        &self.changes
    }

    /// Returns the pending global state change, if any.
    pub fn global_state(&self) -> Option<&GlobalStateChange> {
        self.global_state.as_ref()
    }

    /// Returns the number of pending changes, counting the global state.
    pub fn len(&self) -> usize {
        self.changes.len() + usize::from(self.global_state.is_some())
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A group of mutations committed atomically.
///
/// Operations are applied in the order they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    operations: Vec<BatchOperation>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a payload write.
    pub fn write_data(&mut self, id: impl Into<String>, payload: Vec<u8>) {
        self.operations.push(BatchOperation::WriteData {
            id: id.into(),
            payload,
        });
    }

    /// Queues a payload deletion.
    pub fn delete_data(&mut self, id: impl Into<String>) {
        self.operations
            .push(BatchOperation::DeleteData { id: id.into() });
    }

    /// Takes ownership of a metadata change list and queues its changes.
    ///
    /// The global state change, if any, is queued after the per-entity ones.
    pub fn take_metadata_changes(&mut self, changes: MetadataChangeList) {
        let MetadataChangeList {
            changes,
            global_state,
        } = changes;

        for change in changes {
            self.operations.push(match change {
                MetadataChange::Update { id, metadata } => {
                    BatchOperation::WriteMetadata { id, metadata }
                }
                MetadataChange::Clear { id } => BatchOperation::DeleteMetadata { id },
            });
        }

        match global_state {
            Some(GlobalStateChange::Update(state)) => {
                self.operations
                    .push(BatchOperation::WriteGlobalState { state });
            }
            Some(GlobalStateChange::Clear) => {
                self.operations.push(BatchOperation::DeleteGlobalState);
            }
            None => {}
        }
    }

    /// Returns the queued operations.
    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch holds no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
