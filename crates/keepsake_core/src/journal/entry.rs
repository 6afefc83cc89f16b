//! Journal entry types.

use crate::record::Record;
use crate::schema::{CollectionSchema, IndexSpec};
use crate::types::SchemaVersion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One structural change committed by an upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaChange {
    /// A collection was created.
    CreateCollection {
        /// Collection name.
        name: String,
        /// Primary key path.
        key_path: String,
    },
    /// A secondary index was created.
    CreateIndex {
        /// Collection the index belongs to.
        collection: String,
        /// Index definition.
        index: IndexSpec,
    },
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCollection { name, .. } => write!(f, "create collection {name}"),
            Self::CreateIndex { collection, index } => {
                write!(f, "create index {collection}.{} on {}", index.name, index.key_path)
            }
        }
    }
}

/// A record together with the collection it lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Collection name.
    pub collection: String,
    /// The record.
    pub record: Record,
}

/// One journal frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum JournalEntry {
    /// A committed version transition: structure plus backfilled records.
    Upgrade {
        from: SchemaVersion,
        to: SchemaVersion,
        changes: Vec<SchemaChange>,
        writes: Vec<StoredRecord>,
    },
    /// A record insert or replacement.
    Put(StoredRecord),
    /// A physical record removal.
    Remove { collection: String, id: String },
    /// The complete state, written by compaction.
    Snapshot {
        version: SchemaVersion,
        collections: Vec<CollectionSchema>,
        records: Vec<StoredRecord>,
    },
}
