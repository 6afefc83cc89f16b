//! Non-unique secondary indexes.

use crate::record::Record;
use crate::schema::IndexSpec;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A value an index can be keyed by.
///
/// Only scalar JSON values are indexable. Records whose key path resolves
/// to nothing, `null`, a float, an array or an object are left out of the
/// index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    /// Boolean key.
    Bool(bool),
    /// Integer key.
    Int(i64),
    /// String key.
    Text(String),
}

impl IndexKey {
    /// Converts a JSON value, returning `None` if it is not indexable.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<&str> for IndexKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for IndexKey {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// An in-memory secondary index mapping keys to record ids.
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    spec: IndexSpec,
    entries: BTreeMap<IndexKey, BTreeSet<String>>,
}

impl SecondaryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the index definition.
    #[must_use]
    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    fn key_for(&self, record: &Record) -> Option<IndexKey> {
        record
            .field(&self.spec.key_path)
            .as_ref()
            .and_then(IndexKey::from_value)
    }

    /// Adds a record.
    pub fn insert(&mut self, record: &Record) {
        if let Some(key) = self.key_for(record) {
            self.entries.entry(key).or_default().insert(record.id.clone());
        }
    }

    /// Removes a record. The record must carry the values it was indexed
    /// under.
    pub fn remove(&mut self, record: &Record) {
        if let Some(key) = self.key_for(record) {
            if let Some(ids) = self.entries.get_mut(&key) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Returns the ids stored under `key`, in id order.
    pub fn lookup(&self, key: &IndexKey) -> impl Iterator<Item = &String> {
        self.entries.get(key).into_iter().flatten()
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
