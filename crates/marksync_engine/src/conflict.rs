//! Conflict detection and resolution.
//!
//! A conflict arises when a remote update targets an entity that still
//! carries unacknowledged local edits.

use marksync_model::NodeId;

/// A remote update racing a pending local edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Server id of the entity.
    pub sync_id: String,
    /// Local node, `None` if the entity is a local tombstone.
    pub node: Option<NodeId>,
    /// Local edit counter at the time of the conflict.
    pub local_sequence_number: i64,
    /// Acknowledged edit counter at the time of the conflict.
    pub acked_sequence_number: i64,
    /// Server version carried by the remote update.
    pub remote_version: i64,
    /// Stored hash of the last synced content.
    pub local_hash: Vec<u8>,
    /// Hash of the remote content.
    pub remote_hash: Vec<u8>,
    /// Resolution (if any).
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Returns true if the local side deleted the entity.
    pub fn is_local_deletion(&self) -> bool {
        self.node.is_none()
    }

    /// Resolves the conflict with the given resolution.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }

    /// Returns true if the conflict has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// Resolution for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local edit and drop the remote update.
    KeepLocal,
    /// Apply the remote update and discard the local edit.
    AcceptRemote,
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Server always wins.
    ServerWins,
    /// Client always wins.
    #[default]
    ClientWins,
}

impl ConflictPolicy {
    /// Resolves a conflict according to this policy.
    pub fn resolve(&self, conflict: &mut Conflict) {
        let resolution = match self {
            ConflictPolicy::ServerWins => ConflictResolution::AcceptRemote,
            ConflictPolicy::ClientWins => ConflictResolution::KeepLocal,
        };
        conflict.resolve(resolution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(node: Option<NodeId>, remote_hash: Vec<u8>) -> Conflict {
        Conflict {
            sync_id: "id".into(),
            node,
            local_sequence_number: 1,
            acked_sequence_number: 0,
            remote_version: 7,
            local_hash: vec![1],
            remote_hash,
            resolution: None,
        }
    }

    #[test]
    fn local_deletion_has_no_node() {
        assert!(!conflict(Some(NodeId(4)), vec![2]).is_local_deletion());
        assert!(conflict(None, vec![2]).is_local_deletion());
    }

    #[test]
    fn client_wins_by_default() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::ClientWins);
    }

    #[test]
    fn policy_resolution() {
        let mut c = conflict(Some(NodeId(4)), vec![2]);
        assert!(!c.is_resolved());

        ConflictPolicy::ServerWins.resolve(&mut c);
        assert_eq!(c.resolution, Some(ConflictResolution::AcceptRemote));

        c.resolution = None;
        ConflictPolicy::ClientWins.resolve(&mut c);
        assert_eq!(c.resolution, Some(ConflictResolution::KeepLocal));
        assert!(c.is_resolved());
    }
}
