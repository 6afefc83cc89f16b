//! Generic record operations over one collection.

use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexKey;
use crate::journal::{JournalEntry, StoredRecord};
use crate::record::{generate_id, NewRecord, Payload, Record};
use crate::schema::OWNER_INDEX;
use crate::tables::{CollectionData, Tables};
use tracing::debug;

/// Hook consulted before a record is written.
pub trait RecordValidator: Send + Sync {
    /// Returns an error message to reject the write.
    ///
    /// # Errors
    ///
    /// The message becomes a `ValidationFailed` error.
    fn validate(&self, collection: &str, record: &Record) -> Result<(), String>;
}

impl<F> RecordValidator for F
where
    F: Fn(&str, &Record) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, collection: &str, record: &Record) -> Result<(), String> {
        self(collection, record)
    }
}

/// Filters for list operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Include soft-deleted records.
    pub include_deleted: bool,
}

impl ListOptions {
    /// Active records only.
    #[must_use]
    pub const fn active() -> Self {
        Self {
            include_deleted: false,
        }
    }

    /// Active and soft-deleted records.
    #[must_use]
    pub const fn include_deleted() -> Self {
        Self {
            include_deleted: true,
        }
    }

    fn admits(self, record: &Record) -> bool {
        self.include_deleted || record.is_active()
    }
}

/// Record operations over one collection, through an open connection.
///
/// Each operation checks that the connection is still open. Writes never
/// touch other collections.
#[derive(Debug)]
pub struct RecordStore<'c> {
    conn: &'c Connection,
    name: String,
}

impl<'c> RecordStore<'c> {
    pub(crate) fn new(conn: &'c Connection, name: &str) -> Self {
        Self {
            conn,
            name: name.to_string(),
        }
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, record: &Record) -> CoreResult<()> {
        match self.conn.store().validator(&self.name) {
            Some(validator) => validator
                .validate(&self.name, record)
                .map_err(CoreError::validation),
            None => Ok(()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&CollectionData) -> CoreResult<T>) -> CoreResult<T> {
        self.conn.ensure_open()?;
        self.conn
            .store()
            .read(|tables| f(tables.collection(&self.name)?))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&CollectionData) -> CoreResult<(T, Option<JournalEntry>)>,
    ) -> CoreResult<T> {
        self.conn.ensure_open()?;
        self.conn
            .store()
            .write(|tables: &Tables| f(tables.collection(&self.name)?))
    }

    fn put_entry(&self, record: Record) -> JournalEntry {
        JournalEntry::Put(StoredRecord {
            collection: self.name.clone(),
            record,
        })
    }

    /// Inserts a record and returns its id.
    ///
    /// Both timestamps are set to now and `delFlag` to false. An id is
    /// generated unless one is given.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if an explicit id already exists, or
    /// `ValidationFailed` if the record is rejected.
    pub fn add(&self, new: NewRecord) -> CoreResult<String> {
        let store = self.conn.store();
        let now = store.now();
        let record = new.into_record(generate_id(now), now)?;
        self.validate(&record)?;

        let id = self.write(|data| {
            if data.records.contains_key(&record.id) {
                return Err(CoreError::conflict(&self.name, &record.id));
            }
            Ok((record.id.clone(), Some(self.put_entry(record))))
        })?;
        debug!(collection = %self.name, id = %id, "record added");
        Ok(id)
    }

    /// Shallow-merges `patch` into the stored record and returns the
    /// result.
    ///
    /// `createdAt` is kept; `updatedAt` becomes now, or stays put if the
    /// stored value is later. The read and the write happen under one
    /// lock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is absent, or `ValidationFailed` if the
    /// patch changes the id or the result is rejected.
    pub fn update(&self, id: &str, patch: &Payload) -> CoreResult<Record> {
        let now = self.conn.store().now();
        self.write(|data| {
            let mut record = data
                .records
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::not_found(&self.name, id))?;
            record.apply_patch(patch)?;
            record.updated_at = Some(record.updated_at.map_or(now, |prev| prev.max(now)));
            self.validate(&record)?;
            Ok((record.clone(), Some(self.put_entry(record))))
        })
    }

    /// Returns a record by id, soft-deleted or not.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn get(&self, id: &str) -> CoreResult<Option<Record>> {
        self.read(|data| Ok(data.records.get(id).cloned()))
    }

    /// Returns the active records of `owner`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn list_by_owner(&self, owner: &str) -> CoreResult<Vec<Record>> {
        self.list_by_owner_with(owner, ListOptions::active())
    }

    /// Returns the records of `owner` matching `options`.
    ///
    /// Uses the `by_owner` index when the collection has one and scans
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn list_by_owner_with(&self, owner: &str, options: ListOptions) -> CoreResult<Vec<Record>> {
        self.read(|data| {
            let records = match data.indexes.get(OWNER_INDEX) {
                Some(index) => index
                    .lookup(&IndexKey::from(owner))
                    .filter_map(|id| data.records.get(id))
                    .filter(|r| options.admits(r))
                    .cloned()
                    .collect(),
                None => data
                    .records
                    .values()
                    .filter(|r| r.owner_id == owner && options.admits(r))
                    .cloned()
                    .collect(),
            };
            Ok(records)
        })
    }

    /// Returns every record matching `options`, in id order.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn list_all(&self, options: ListOptions) -> CoreResult<Vec<Record>> {
        self.read(|data| {
            Ok(data
                .records
                .values()
                .filter(|r| options.admits(r))
                .cloned()
                .collect())
        })
    }

    /// Counts the records matching `options`.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn count(&self, options: ListOptions) -> CoreResult<usize> {
        self.read(|data| Ok(data.records.values().filter(|r| options.admits(r)).count()))
    }

    /// Looks records up through a named secondary index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the collection has no such index.
    pub fn find_by_index(
        &self,
        index: &str,
        key: &IndexKey,
        options: ListOptions,
    ) -> CoreResult<Vec<Record>> {
        self.read(|data| {
            let secondary = data.indexes.get(index).ok_or_else(|| {
                CoreError::invalid_operation(format!("{} has no index {index}", self.name))
            })?;
            Ok(secondary
                .lookup(key)
                .filter_map(|id| data.records.get(id))
                .filter(|r| options.admits(r))
                .cloned()
                .collect())
        })
    }

    /// Marks a record deleted. Returns false if it already was, in which
    /// case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the id is absent.
    pub fn soft_delete(&self, id: &str) -> CoreResult<bool> {
        let now = self.conn.store().now();
        let changed = self.write(|data| {
            let mut record = data
                .records
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::not_found(&self.name, id))?;
            if record.del_flag {
                return Ok((false, None));
            }
            record.del_flag = true;
            record.updated_at = Some(record.updated_at.map_or(now, |prev| prev.max(now)));
            Ok((true, Some(self.put_entry(record))))
        })?;
        if changed {
            debug!(collection = %self.name, id, "record soft-deleted");
        }
        Ok(changed)
    }

    /// Physically removes a record. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn hard_delete(&self, id: &str) -> CoreResult<bool> {
        let existed = self.write(|data| {
            if !data.records.contains_key(id) {
                return Ok((false, None));
            }
            let entry = JournalEntry::Remove {
                collection: self.name.clone(),
                id: id.to_string(),
            };
            Ok((true, Some(entry)))
        })?;
        if existed {
            debug!(collection = %self.name, id, "record removed");
        }
        Ok(existed)
    }

    /// Writes a record exactly as given, replacing any record with its id.
    ///
    /// Timestamps and `delFlag` are not touched and validators do not run.
    /// Meant for imports and restores.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if the id is empty.
    pub fn restore(&self, record: Record) -> CoreResult<()> {
        if record.id.is_empty() {
            return Err(CoreError::validation("record id must not be empty"));
        }
        self.write(|_| Ok(((), Some(self.put_entry(record)))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSpec;
    use crate::store::Store;
    use crate::types::SchemaVersion;
    use crate::upgrade::{PlannedOps, StructuralOp};
    use serde_json::json;
    use std::sync::Arc;

    fn open() -> (Store, Connection) {
        let store = Store::open_in_memory().unwrap();
        let mut ops = StructuralOp::create_from_spec(
            &crate::schema::CollectionSpec::new("meals").with_index(IndexSpec::new("by_kind", "kind")),
        );
        ops.push(StructuralOp::create_collection("notes"));
        let conn = store
            .connect(SchemaVersion::new(1), &PlannedOps(ops))
            .unwrap();
        (store, conn)
    }

    fn patch(value: serde_json::Value) -> Payload {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn add_then_get() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        let id = meals
            .add(NewRecord::new("alice").with_field("dish", "soup"))
            .unwrap();

        let record = meals.get(&id).unwrap().unwrap();
        assert_eq!(record.owner_id, "alice");
        assert_eq!(record.payload["dish"], "soup");
        assert!(!record.del_flag);
        assert!(record.created_at.is_some());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn duplicate_explicit_id_conflicts() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        meals.add(NewRecord::new("a").with_id("m1")).unwrap();
        let err = meals.add(NewRecord::new("b").with_id("m1")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));
        assert_eq!(meals.get("m1").unwrap().unwrap().owner_id, "a");
    }

    #[test]
    fn update_missing_is_not_found() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        meals.add(NewRecord::new("a").with_id("m1")).unwrap();

        let err = meals
            .update("missing-id", &patch(json!({ "dish": "x" })))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(meals.count(ListOptions::include_deleted()).unwrap(), 1);
    }

    #[test]
    fn update_keeps_created_at() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        let id = meals.add(NewRecord::new("a")).unwrap();
        let before = meals.get(&id).unwrap().unwrap();

        let after = meals.update(&id, &patch(json!({ "dish": "stew" }))).unwrap();
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.payload["dish"], "stew");
    }

    #[test]
    fn update_never_moves_updated_at_backwards() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        let mut future = NewRecord::new("a")
            .with_id("m1")
            .into_record(String::new(), 1)
            .unwrap();
        future.updated_at = Some(u64::MAX - 1);
        meals.restore(future).unwrap();

        let after = meals.update("m1", &patch(json!({ "dish": "x" }))).unwrap();
        assert_eq!(after.updated_at, Some(u64::MAX - 1));
    }

    #[test]
    fn soft_delete_hides_from_owner_listing() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        let keep = meals.add(NewRecord::new("alice")).unwrap();
        let gone = meals.add(NewRecord::new("alice")).unwrap();

        assert!(meals.soft_delete(&gone).unwrap());
        assert!(!meals.soft_delete(&gone).unwrap());

        let active: Vec<_> = meals
            .list_by_owner("alice")
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(active, vec![keep]);
        assert_eq!(
            meals
                .list_by_owner_with("alice", ListOptions::include_deleted())
                .unwrap()
                .len(),
            2
        );
        assert!(meals.get(&gone).unwrap().unwrap().del_flag);
    }

    #[test]
    fn soft_delete_unknown_is_not_found() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        assert!(matches!(
            meals.soft_delete("nope"),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn hard_delete_reports_existence() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        let id = meals.add(NewRecord::new("alice")).unwrap();
        assert!(meals.hard_delete(&id).unwrap());
        assert!(!meals.hard_delete(&id).unwrap());
        assert!(meals.get(&id).unwrap().is_none());
    }

    #[test]
    fn owner_listing_without_index_scans() {
        let (_store, conn) = open();
        let notes = conn.collection("notes").unwrap();
        notes.add(NewRecord::new("alice")).unwrap();
        notes.add(NewRecord::new("bob")).unwrap();
        assert_eq!(notes.list_by_owner("alice").unwrap().len(), 1);
    }

    #[test]
    fn find_by_declared_index() {
        let (_store, conn) = open();
        let meals = conn.collection("meals").unwrap();
        meals
            .add(NewRecord::new("a").with_field("kind", "breakfast"))
            .unwrap();
        meals.add(NewRecord::new("a").with_field("kind", "lunch")).unwrap();

        let found = meals
            .find_by_index("by_kind", &IndexKey::from("lunch"), ListOptions::active())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(matches!(
            meals.find_by_index("by_mood", &IndexKey::from("x"), ListOptions::active()),
            Err(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn validator_rejects_writes() {
        let (store, conn) = open();
        store.set_validator(
            "meals",
            Arc::new(|_: &str, record: &Record| {
                if record.payload.contains_key("dish") {
                    Ok(())
                } else {
                    Err("dish is required".to_string())
                }
            }),
        );
        let meals = conn.collection("meals").unwrap();
        let err = meals.add(NewRecord::new("a")).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed { .. }));

        let id = meals.add(NewRecord::new("a").with_field("dish", "x")).unwrap();
        store.clear_validator("meals");
        assert!(meals.update(&id, &patch(json!({ "n": 1 }))).is_ok());
    }

    #[test]
    fn writes_stay_in_their_collection() {
        let (_store, conn) = open();
        conn.collection("meals")
            .unwrap()
            .add(NewRecord::new("a").with_id("x"))
            .unwrap();
        assert!(conn.collection("notes").unwrap().get("x").unwrap().is_none());
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let (_store, conn) = open();
        assert!(matches!(
            conn.collection("periods"),
            Err(CoreError::CollectionNotFound { .. })
        ));
    }
}
