//! Collection and index definitions, and the live schema they build up.

use crate::types::SchemaVersion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the per-owner secondary index.
pub const OWNER_INDEX: &str = "by_owner";

/// Name of the creation-time secondary index.
pub const CREATED_AT_INDEX: &str = "by_created_at";

/// The only primary key path records are stored under.
pub const PRIMARY_KEY_PATH: &str = "id";

/// A non-unique secondary index over one key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique within its collection.
    pub name: String,
    /// Key path the index reads, such as `ownerId` or `meta.kind`.
    pub key_path: String,
}

impl IndexSpec {
    /// Creates an index spec.
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
        }
    }

    /// The `by_owner` index over `ownerId`.
    #[must_use]
    pub fn by_owner() -> Self {
        Self::new(OWNER_INDEX, "ownerId")
    }

    /// The `by_created_at` index over `createdAt`.
    #[must_use]
    pub fn by_created_at() -> Self {
        Self::new(CREATED_AT_INDEX, "createdAt")
    }
}

/// A required collection: what a feature needs to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    /// Collection name.
    pub name: String,
    /// Primary key path.
    pub key_path: String,
    /// Secondary indexes.
    pub indexes: Vec<IndexSpec>,
}

impl CollectionSpec {
    /// A collection keyed by `id` with the `by_owner` index.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: PRIMARY_KEY_PATH.to_string(),
            indexes: vec![IndexSpec::by_owner()],
        }
    }

    /// A collection keyed by `id` with no secondary indexes.
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: PRIMARY_KEY_PATH.to_string(),
            indexes: Vec::new(),
        }
    }

    /// Adds a secondary index.
    #[must_use]
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        if !self.indexes.iter().any(|i| i.name == index.name) {
            self.indexes.push(index);
        }
        self
    }
}

/// A collection as it exists in the live schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Primary key path.
    pub key_path: String,
    /// Secondary indexes by name.
    pub indexes: BTreeMap<String, IndexSpec>,
}

impl CollectionSchema {
    pub(crate) fn new(name: &str, key_path: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
            indexes: BTreeMap::new(),
        }
    }

    /// Returns true if an index with this name exists.
    #[must_use]
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains_key(name)
    }
}

/// The live schema: a version plus the collections created so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub(crate) version: SchemaVersion,
    pub(crate) collections: BTreeMap<String, CollectionSchema>,
}

impl Schema {
    /// Returns the schema version.
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Returns a collection by name.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Returns true if the collection exists.
    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Returns every collection, ordered by name.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionSchema> {
        self.collections.values()
    }

    /// Returns collection names, ordered.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Computes what `required` needs that this schema lacks.
    ///
    /// Indexes are matched by name.
    #[must_use]
    pub fn missing(&self, required: &[CollectionSpec]) -> SchemaDelta {
        let mut delta = SchemaDelta::default();
        for spec in required {
            match self.collections.get(&spec.name) {
                None => match delta.collections.iter_mut().find(|c| c.name == spec.name) {
                    Some(pending) => {
                        for index in &spec.indexes {
                            *pending = pending.clone().with_index(index.clone());
                        }
                    }
                    None => delta.collections.push(spec.clone()),
                },
                Some(existing) => {
                    for index in &spec.indexes {
                        let already = delta
                            .indexes
                            .iter()
                            .any(|(c, i)| c == &spec.name && i.name == index.name);
                        if !existing.has_index(&index.name) && !already {
                            delta.indexes.push((spec.name.clone(), index.clone()));
                        }
                    }
                }
            }
        }
        delta
    }
}

/// The structural difference between a schema and a requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDelta {
    /// Collections that do not exist at all, with their indexes.
    pub collections: Vec<CollectionSpec>,
    /// Indexes missing from collections that do exist.
    pub indexes: Vec<(String, IndexSpec)>,
}

impl SchemaDelta {
    /// Returns true if nothing is missing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.indexes.is_empty()
    }

    /// Human-readable names of what is missing: `meals` for a collection,
    /// `meals.by_owner` for an index.
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|c| c.name.clone())
            .chain(
                self.indexes
                    .iter()
                    .map(|(collection, index)| format!("{collection}.{}", index.name)),
            )
            .collect()
    }
}
