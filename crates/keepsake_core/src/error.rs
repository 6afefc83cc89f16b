//! Error types for the Keepsake store.

use crate::types::SchemaVersion;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] keepsake_storage::StorageError),

    /// CBOR or JSON codec error.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The journal holds a frame that cannot be trusted.
    #[error("journal corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Byte offset of the bad frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the store directory.
    #[error("store locked: another process has the store open")]
    StoreLocked,

    /// An older open connection refused to yield to a version change.
    #[error(
        "schema upgrade from {current} to {requested} is blocked by {blocking} open \
         connection(s); close other open sessions of the app and try again"
    )]
    SchemaBlocked {
        /// Version the store is at.
        current: SchemaVersion,
        /// Version that was requested.
        requested: SchemaVersion,
        /// Number of connections that kept the store open.
        blocking: usize,
    },

    /// A structural step failed; the store stays at `from`.
    #[error("schema upgrade from {from} to {to} failed: {message}")]
    SchemaUpgradeFailed {
        /// Version the store stayed at.
        from: SchemaVersion,
        /// Version that was attempted.
        to: SchemaVersion,
        /// Description of the failing step.
        message: String,
    },

    /// Required collections are still missing after an upgrade.
    #[error("schema verification failed: missing {}", .missing.join(", "))]
    SchemaVerificationFailed {
        /// Collections or indexes that are absent.
        missing: Vec<String>,
    },

    /// The named collection does not exist in the schema.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Name of the collection.
        name: String,
    },

    /// No record with this id exists.
    #[error("record {id} not found in {collection}")]
    NotFound {
        /// Collection searched.
        collection: String,
        /// Missing id.
        id: String,
    },

    /// A record with this id already exists.
    #[error("record {id} already exists in {collection}")]
    Conflict {
        /// Collection written to.
        collection: String,
        /// Duplicate id.
        id: String,
    },

    /// A write was rejected before reaching the store.
    #[error("validation failed: {message}")]
    ValidationFailed {
        /// Why the write was rejected.
        message: String,
    },

    /// The connection is not open.
    #[error("connection is not open (state: {state})")]
    ConnectionClosed {
        /// State the connection was found in.
        state: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Creates a collection-not-found error.
    pub fn collection_not_found(name: impl Into<String>) -> Self {
        Self::CollectionNotFound { name: name.into() }
    }

    /// Creates an upgrade failure.
    pub fn upgrade_failed(
        from: SchemaVersion,
        to: SchemaVersion,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaUpgradeFailed {
            from,
            to,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for the schema lifecycle errors that callers must
    /// surface as is instead of retrying.
    #[must_use]
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::SchemaBlocked { .. }
                | Self::SchemaUpgradeFailed { .. }
                | Self::SchemaVerificationFailed { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}
