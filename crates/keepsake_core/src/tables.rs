//! In-memory tables rebuilt from the journal.

use crate::error::{CoreError, CoreResult};
use crate::index::SecondaryIndex;
use crate::journal::{JournalEntry, SchemaChange, StoredRecord};
use crate::record::Record;
use crate::schema::{CollectionSchema, IndexSpec, Schema, PRIMARY_KEY_PATH};
use std::collections::BTreeMap;

/// Records and index data of one collection.
#[derive(Debug, Clone, Default)]
pub(crate) struct CollectionData {
    pub records: BTreeMap<String, Record>,
    pub indexes: BTreeMap<String, SecondaryIndex>,
}

impl CollectionData {
    fn put(&mut self, record: Record) {
        if let Some(previous) = self.records.get(&record.id) {
            for index in self.indexes.values_mut() {
                index.remove(previous);
            }
        }
        for index in self.indexes.values_mut() {
            index.insert(&record);
        }
        self.records.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> Option<Record> {
        let removed = self.records.remove(id)?;
        for index in self.indexes.values_mut() {
            index.remove(&removed);
        }
        Some(removed)
    }

    fn build_index(&mut self, spec: IndexSpec) {
        let mut index = SecondaryIndex::new(spec);
        for record in self.records.values() {
            index.insert(record);
        }
        self.indexes.insert(index.spec().name.clone(), index);
    }
}

/// The whole store state: schema plus collection data.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub schema: Schema,
    pub data: BTreeMap<String, CollectionData>,
}

impl Tables {
    /// Rebuilds tables from journal entries.
    pub fn replay(entries: Vec<JournalEntry>) -> CoreResult<Self> {
        let mut tables = Self::default();
        for entry in entries {
            tables.apply(entry)?;
        }
        Ok(tables)
    }

    /// Applies one journal entry.
    pub fn apply(&mut self, entry: JournalEntry) -> CoreResult<()> {
        match entry {
            JournalEntry::Upgrade {
                to, changes, writes, ..
            } => {
                for change in &changes {
                    self.apply_change(change)?;
                }
                for write in writes {
                    self.put(&write.collection, write.record)?;
                }
                self.schema.version = to;
            }
            JournalEntry::Put(StoredRecord { collection, record }) => {
                self.put(&collection, record)?;
            }
            JournalEntry::Remove { collection, id } => {
                self.remove(&collection, &id)?;
            }
            JournalEntry::Snapshot {
                version,
                collections,
                records,
            } => {
                *self = Self::default();
                for collection in collections {
                    let mut data = CollectionData::default();
                    for spec in collection.indexes.values() {
                        data.build_index(spec.clone());
                    }
                    self.data.insert(collection.name.clone(), data);
                    self.schema
                        .collections
                        .insert(collection.name.clone(), collection);
                }
                for stored in records {
                    self.put(&stored.collection, stored.record)?;
                }
                self.schema.version = version;
            }
        }
        Ok(())
    }

    /// Applies a structural change. Returns false if it was already in
    /// place and nothing changed.
    pub fn apply_change(&mut self, change: &SchemaChange) -> CoreResult<bool> {
        match change {
            SchemaChange::CreateCollection { name, key_path } => {
                if self.schema.has_collection(name) {
                    return Ok(false);
                }
                if key_path != PRIMARY_KEY_PATH {
                    return Err(CoreError::invalid_operation(format!(
                        "collection {name}: unsupported key path {key_path}"
                    )));
                }
                self.schema
                    .collections
                    .insert(name.clone(), CollectionSchema::new(name, key_path));
                self.data.insert(name.clone(), CollectionData::default());
                Ok(true)
            }
            SchemaChange::CreateIndex { collection, index } => {
                let schema = self
                    .schema
                    .collections
                    .get_mut(collection)
                    .ok_or_else(|| CoreError::collection_not_found(collection.clone()))?;
                if schema.has_index(&index.name) {
                    return Ok(false);
                }
                schema.indexes.insert(index.name.clone(), index.clone());
                self.data
                    .entry(collection.clone())
                    .or_default()
                    .build_index(index.clone());
                Ok(true)
            }
        }
    }

    pub fn collection(&self, name: &str) -> CoreResult<&CollectionData> {
        self.data
            .get(name)
            .ok_or_else(|| CoreError::collection_not_found(name))
    }

    pub fn put(&mut self, collection: &str, record: Record) -> CoreResult<()> {
        self.data
            .get_mut(collection)
            .ok_or_else(|| CoreError::collection_not_found(collection))?
            .put(record);
        Ok(())
    }

    pub fn remove(&mut self, collection: &str, id: &str) -> CoreResult<Option<Record>> {
        Ok(self
            .data
            .get_mut(collection)
            .ok_or_else(|| CoreError::collection_not_found(collection))?
            .remove(id))
    }

    /// Captures the full state as one entry.
    pub fn snapshot_entry(&self) -> JournalEntry {
        let records = self
            .data
            .iter()
            .flat_map(|(collection, data)| {
                data.records.values().map(move |record| StoredRecord {
                    collection: collection.clone(),
                    record: record.clone(),
                })
            })
            .collect();
        JournalEntry::Snapshot {
            version: self.schema.version,
            collections: self.schema.collections.values().cloned().collect(),
            records,
        }
    }

    pub fn record_count(&self) -> usize {
        self.data.values().map(|d| d.records.len()).sum()
    }
}
