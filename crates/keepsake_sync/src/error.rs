//! Error types for the attachment pipeline.

use crate::report::FileFailure;
use keepsake_core::CoreError;
use thiserror::Error;

/// Result type for attachment operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing attachments.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote session is missing or expired.
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// The batch was rejected before any upload.
    #[error("attachment validation failed: {}", .violations.join("; "))]
    ValidationFailed {
        /// One entry per offending file or rule.
        violations: Vec<String>,
    },

    /// The object store failed.
    #[error("remote storage error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// No object store is configured.
    #[error("no remote storage configured")]
    NotConnected,

    /// Not a single file of the batch was uploaded.
    #[error("all {} uploads failed", .failures.len())]
    BatchFailed {
        /// Why each file failed.
        failures: Vec<FileFailure>,
    },

    /// The object store does not offer this operation.
    #[error("operation not supported by this object store: {0}")]
    Unsupported(&'static str),

    /// Local store error while linking attachments to records.
    #[error("store error: {0}")]
    Store(#[from] CoreError),

    /// A response body could not be decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl SyncError {
    /// Creates a retryable remote error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a validation error with a single violation.
    pub fn validation(violation: impl Into<String>) -> Self {
        Self::ValidationFailed {
            violations: vec![violation.into()],
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { retryable, .. } => *retryable,
            Self::BatchFailed { failures } => failures.iter().all(|f| f.retryable),
            _ => false,
        }
    }

    /// Returns true if the caller should prompt for re-authentication.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
