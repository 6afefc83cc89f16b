//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to truncate the log beyond its current size.
    #[error("cannot truncate log of {size} bytes to {requested} bytes")]
    TruncatePastEnd {
        /// The requested length.
        requested: u64,
        /// The current log size.
        size: u64,
    },

    /// The slot holds data that cannot be interpreted.
    #[error("slot corrupted: {0}")]
    Corrupted(String),
}
