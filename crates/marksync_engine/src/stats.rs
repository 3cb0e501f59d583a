//! Processor statistics.
//!
//! Counters are atomic and can be read while a batch is being applied.

use crate::reconciler::ApplyReport;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters of a processor.
#[derive(Debug, Default)]
pub struct SyncStats {
    // Inbound
    batches_received: AtomicU64,
    updates_applied: AtomicU64,
    updates_dropped: AtomicU64,
    conflicts: AtomicU64,

    // Outbound
    commit_requests: AtomicU64,
    commits_completed: AtomicU64,

    // Errors
    errors: AtomicU64,
}

impl SyncStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_batch(&self, report: &ApplyReport) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.updates_applied
            .fetch_add(report.applied() as u64, Ordering::Relaxed);
        self.updates_dropped
            .fetch_add(report.dropped.len() as u64, Ordering::Relaxed);
        self.conflicts
            .fetch_add(report.conflicts.len() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_requests(&self, count: usize) {
        self.commit_requests
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_completed(&self) {
        self.commits_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            updates_applied: self.updates_applied.load(Ordering::Relaxed),
            updates_dropped: self.updates_dropped.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            commit_requests: self.commit_requests.load(Ordering::Relaxed),
            commits_completed: self.commits_completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncStatsSnapshot {
    /// Inbound batches applied.
    pub batches_received: u64,
    /// Records that changed the tree or the tracker.
    pub updates_applied: u64,
    /// Records that were dropped.
    pub updates_dropped: u64,
    /// Conflicts with unsynced local edits.
    pub conflicts: u64,
    /// Entities handed out for commit.
    pub commit_requests: u64,
    /// Commit responses applied.
    pub commits_completed: u64,
    /// Model errors reported.
    pub errors: u64,
}

/// Entity counts reported for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounters {
    /// Tracked entities, tombstones included.
    pub entities: usize,
    /// Tombstones awaiting commit.
    pub tombstones: usize,
    /// Entities with unsynced local edits.
    pub unsynced: usize,
}
