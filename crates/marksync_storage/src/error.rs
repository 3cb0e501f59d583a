//! Error types for record store operations.

use std::io;
use thiserror::Error;

/// Result type for record store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during record store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A batch could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The store contents are corrupted beyond a torn tail write.
    #[error("store corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// The store refused the write batch.
    #[error("write batch rejected: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Creates a codec error from any displayable cause.
    pub fn codec(cause: impl std::fmt::Display) -> Self {
        Self::Codec(cause.to_string())
    }
}
