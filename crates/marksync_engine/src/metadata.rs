//! Persisted sync metadata.
//!
//! The metadata blob holds one [`BookmarkMetadata`] record per tracked
//! entity plus the global [`ModelTypeState`]. It is encoded as CBOR.

use crate::error::{SyncError, SyncResult};
use crate::types::ModelTypeState;
use marksync_model::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Version written by [`BookmarkModelMetadata::to_bytes`].
pub const METADATA_FORMAT_VERSION: u32 = 1;

/// Sync bookkeeping for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMetadata {
    /// Server id, or the client id before the first commit.
    pub server_id: String,
    /// True for tombstones.
    pub is_deleted: bool,
    /// Local edit counter.
    pub sequence_number: i64,
    /// Highest sequence number the server acknowledged.
    pub acked_sequence_number: i64,
    /// Last known server version.
    pub server_version: i64,
    /// Creation time in microseconds since the Unix epoch.
    pub creation_time: i64,
    /// Last modification time in microseconds since the Unix epoch.
    pub modification_time: i64,
    /// Hash of the last synced specifics; empty when unknown.
    pub specifics_hash: Vec<u8>,
}

impl EntityMetadata {
    /// Returns true if local edits are waiting for a commit.
    pub fn is_unsynced(&self) -> bool {
        self.sequence_number > self.acked_sequence_number
    }
}

/// One persisted entity: its metadata and, for live entities, its node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkMetadata {
    /// Local node id; absent for tombstones.
    pub id: Option<NodeId>,
    /// Sync bookkeeping.
    pub metadata: EntityMetadata,
}

/// The complete persisted sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookmarkModelMetadata {
    /// Encoding version.
    pub format_version: u32,
    /// Global sync state.
    pub model_type_state: ModelTypeState,
    /// Per-entity records.
    pub bookmarks_metadata: Vec<BookmarkMetadata>,
}

impl Default for BookmarkModelMetadata {
    fn default() -> Self {
        Self {
            format_version: METADATA_FORMAT_VERSION,
            model_type_state: ModelTypeState::default(),
            bookmarks_metadata: Vec::new(),
        }
    }
}

/// A structural problem found by [`BookmarkModelMetadata::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataIssue {
    /// Two records share a server id.
    DuplicateServerId(String),
    /// Two records point at the same node.
    DuplicateNodeId(NodeId),
    /// A tombstone carries a node id.
    TombstoneWithNodeId(String),
    /// A live record has no node id.
    MissingNodeId(String),
    /// The acknowledged sequence number is ahead of the local one.
    AckedAheadOfSequence(String),
    /// Entity records exist although the initial sync is not done.
    MetadataWithoutInitialSync(usize),
}

impl fmt::Display for MetadataIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataIssue::DuplicateServerId(id) => write!(f, "duplicate server id {id}"),
            MetadataIssue::DuplicateNodeId(id) => write!(f, "duplicate node id {id}"),
            MetadataIssue::TombstoneWithNodeId(id) => {
                write!(f, "tombstone {id} carries a bookmark id")
            }
            MetadataIssue::MissingNodeId(id) => write!(f, "bookmark id missing for {id}"),
            MetadataIssue::AckedAheadOfSequence(id) => {
                write!(f, "acked sequence number ahead of sequence number for {id}")
            }
            MetadataIssue::MetadataWithoutInitialSync(count) => write!(
                f,
                "{count} entity records present while initial sync is not done"
            ),
        }
    }
}

impl BookmarkModelMetadata {
    /// Encodes as CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(SyncError::metadata)?;
        Ok(bytes)
    }

    /// Decodes from CBOR. An empty blob decodes to the default metadata.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed blobs and unknown format versions.
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let metadata: Self = ciborium::from_reader(bytes).map_err(SyncError::metadata)?;
        if metadata.format_version > METADATA_FORMAT_VERSION {
            return Err(SyncError::Metadata(format!(
                "unsupported metadata format version {}",
                metadata.format_version
            )));
        }
        Ok(metadata)
    }

    /// Reports structural problems. An empty result means the metadata is
    /// consistent.
    pub fn validate(&self) -> Vec<MetadataIssue> {
        let mut issues = Vec::new();
        let mut server_ids = HashSet::new();
        let mut node_ids = HashSet::new();

        if !self.model_type_state.initial_sync_done && !self.bookmarks_metadata.is_empty() {
            issues.push(MetadataIssue::MetadataWithoutInitialSync(
                self.bookmarks_metadata.len(),
            ));
        }

        for entry in &self.bookmarks_metadata {
            let server_id = &entry.metadata.server_id;
            if !server_ids.insert(server_id.as_str()) {
                issues.push(MetadataIssue::DuplicateServerId(server_id.clone()));
            }
            match (entry.metadata.is_deleted, entry.id) {
                (true, Some(_)) => {
                    issues.push(MetadataIssue::TombstoneWithNodeId(server_id.clone()));
                }
                (false, None) => issues.push(MetadataIssue::MissingNodeId(server_id.clone())),
                (false, Some(node)) => {
                    if !node_ids.insert(node) {
                        issues.push(MetadataIssue::DuplicateNodeId(node));
                    }
                }
                (true, None) => {}
            }
            if entry.metadata.acked_sequence_number > entry.metadata.sequence_number {
                issues.push(MetadataIssue::AckedAheadOfSequence(server_id.clone()));
            }
        }

        issues
    }
}
