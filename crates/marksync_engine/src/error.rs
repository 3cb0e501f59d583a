//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Per-record problems inside an update batch are not errors; they are
/// logged and listed in the [`ApplyReport`](crate::ApplyReport).
#[derive(Error, Debug)]
pub enum SyncError {
    /// The record store failed.
    #[error("storage error: {0}")]
    Storage(#[from] marksync_storage::StorageError),

    /// The bookmark tree rejected an operation.
    #[error("bookmark model error: {0}")]
    Model(#[from] marksync_model::ModelError),

    /// Sync metadata could not be encoded or decoded.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// The call is not valid in the processor's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The channel handle outlived the connection it was issued for.
    #[error("processor handle invalidated")]
    HandleInvalidated,

    /// No commit queue is attached.
    #[error("not connected to a commit queue")]
    NotConnected,

    /// No record store is attached.
    #[error("no record store attached")]
    NoStore,
}

impl SyncError {
    /// Creates a metadata error from any displayable cause.
    pub fn metadata(cause: impl std::fmt::Display) -> Self {
        Self::Metadata(cause.to_string())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Returns true if this error is reported upward as a model error.
    ///
    /// Model errors are failures of the store or the tree. They halt the
    /// operation in flight but leave the processor usable.
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            SyncError::Storage(_) | SyncError::Model(_) | SyncError::Metadata(_)
        )
    }
}
