//! Channel contract between the processor and the commit queue.
//!
//! The commit queue (the transport side) is outside this crate. It talks to
//! the processor through [`ModelTypeProcessor`], and the processor talks
//! back through [`CommitQueue`].

use crate::error::{SyncError, SyncResult};
use crate::reconciler::ApplyReport;
use crate::types::{CommitRequestData, CommitResponseData, ModelTypeState, UpdateResponseData};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The transport's side of the channel.
pub trait CommitQueue: Send {
    /// Asks the transport to schedule a commit pass.
    fn nudge_for_commit(&self);
}

/// The processor's side of the channel, handed to the transport on start.
pub trait ModelTypeProcessor: Send {
    /// Attaches the commit queue.
    ///
    /// # Errors
    ///
    /// Fails once the handle is invalidated.
    fn connect_sync(&self, queue: Box<dyn CommitQueue>) -> SyncResult<()>;

    /// Detaches the commit queue.
    ///
    /// # Errors
    ///
    /// Fails once the handle is invalidated.
    fn disconnect_sync(&self) -> SyncResult<()>;

    /// Returns up to `max_entries` unsynced entities; 0 uses the configured
    /// default.
    ///
    /// # Errors
    ///
    /// Fails once the handle is invalidated or before the first sync.
    fn get_local_changes(&self, max_entries: usize) -> SyncResult<Vec<CommitRequestData>>;

    /// Applies the server's answer to a commit.
    ///
    /// # Errors
    ///
    /// Fails once the handle is invalidated, or if persisting fails.
    fn on_commit_completed(
        &self,
        state: ModelTypeState,
        responses: Vec<CommitResponseData>,
    ) -> SyncResult<()>;

    /// Applies an inbound update batch.
    ///
    /// # Errors
    ///
    /// Fails once the handle is invalidated, before the tree loaded, or if
    /// persisting fails. Problems with single records are not errors.
    fn on_update_received(
        &self,
        state: ModelTypeState,
        updates: Vec<UpdateResponseData>,
    ) -> SyncResult<ApplyReport>;
}

/// Receives model errors.
pub type ErrorHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Parameters of a start request.
#[derive(Clone)]
pub struct ActivationRequest {
    /// Called with every model error while sync is running.
    pub error_handler: ErrorHandler,
}

impl ActivationRequest {
    /// Creates a request.
    pub fn new(error_handler: impl Fn(&SyncError) + Send + Sync + 'static) -> Self {
        Self {
            error_handler: Arc::new(error_handler),
        }
    }
}

impl fmt::Debug for ActivationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationRequest").finish_non_exhaustive()
    }
}

/// What the transport receives once the processor is ready.
pub struct ActivationResponse {
    /// Global sync state at activation.
    pub model_type_state: ModelTypeState,
    /// Channel handle, valid until sync stops.
    pub type_processor: Box<dyn ModelTypeProcessor>,
}

impl fmt::Debug for ActivationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationResponse")
            .field("model_type_state", &self.model_type_state)
            .finish_non_exhaustive()
    }
}

/// Called once the processor is ready to sync.
pub type StartCallback = Box<dyn FnOnce(ActivationResponse) + Send>;

/// What happens to persisted sync metadata when sync stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFate {
    /// Keep tracking; the next start resumes incrementally.
    KeepMetadata,
    /// Forget all sync state; the next start performs a fresh first sync.
    ClearMetadata,
}

/// A commit queue that only counts nudges.
#[derive(Debug, Clone, Default)]
pub struct MockCommitQueue {
    nudges: Arc<AtomicUsize>,
}

impl MockCommitQueue {
    /// Creates a new mock queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nudges received by this queue and its clones.
    pub fn nudge_count(&self) -> usize {
        self.nudges.load(Ordering::SeqCst)
    }

    /// Resets the nudge counter.
    pub fn reset(&self) {
        self.nudges.store(0, Ordering::SeqCst);
    }
}

impl CommitQueue for MockCommitQueue {
    fn nudge_for_commit(&self) {
        self.nudges.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_queue_counts_across_clones() {
        let queue = MockCommitQueue::new();
        let boxed: Box<dyn CommitQueue> = Box::new(queue.clone());

        boxed.nudge_for_commit();
        boxed.nudge_for_commit();
        assert_eq!(queue.nudge_count(), 2);

        queue.reset();
        assert_eq!(queue.nudge_count(), 0);
    }

    #[test]
    fn activation_request_calls_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let request = ActivationRequest::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        (request.error_handler)(&SyncError::NotConnected);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
