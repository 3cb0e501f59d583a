//! Configuration for the sync engine.

use crate::conflict::ConflictPolicy;

/// What happens to a remote create whose parent is not tracked yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrphanPolicy {
    /// Drop the record with a logged error.
    #[default]
    Drop,
    /// Keep the record and retry it after each batch until its parent
    /// arrives.
    Defer,
}

/// How an inbound batch is ordered before it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReorderStrategy {
    /// Permanent folders first, then parents before children, then
    /// deletions deepest first.
    #[default]
    Topological,
    /// Permanent folders first, then the remaining non-deletions and then
    /// the deletions, each in arrival order. Correct only for one level of
    /// new nesting per batch.
    PermanentFirst,
}

/// Configuration for the bookmark sync processor.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Resolution of remote updates to entities with unsynced local edits.
    pub conflict_policy: ConflictPolicy,
    /// Handling of remote creates with an unknown parent.
    pub orphan_policy: OrphanPolicy,
    /// Ordering applied to inbound batches.
    pub reorder_strategy: ReorderStrategy,
    /// Maximum number of orphans kept under [`OrphanPolicy::Defer`].
    pub max_deferred_updates: usize,
    /// Number of commit entries returned when the caller asks for 0.
    pub max_commit_batch: usize,
    /// Match remote creates against identical untracked local nodes during
    /// the first sync instead of creating duplicates.
    pub merge_on_initial_sync: bool,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            conflict_policy: ConflictPolicy::ClientWins,
            orphan_policy: OrphanPolicy::Drop,
            reorder_strategy: ReorderStrategy::Topological,
            max_deferred_updates: 1000,
            max_commit_batch: 100,
            merge_on_initial_sync: true,
        }
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the orphan policy.
    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    /// Sets the reorder strategy.
    pub fn with_reorder_strategy(mut self, strategy: ReorderStrategy) -> Self {
        self.reorder_strategy = strategy;
        self
    }

    /// Sets the deferred orphan limit.
    pub fn with_max_deferred_updates(mut self, max: usize) -> Self {
        self.max_deferred_updates = max;
        self
    }

    /// Sets the default commit batch size.
    pub fn with_max_commit_batch(mut self, max: usize) -> Self {
        self.max_commit_batch = max;
        self
    }

    /// Enables or disables matching during the first sync.
    pub fn with_merge_on_initial_sync(mut self, merge: bool) -> Self {
        self.merge_on_initial_sync = merge;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
