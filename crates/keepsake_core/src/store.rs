//! The store handle.

use crate::collection::RecordValidator;
use crate::config::StoreConfig;
use crate::connection::{Connection, ConnectionTable};
use crate::dir::StoreDir;
use crate::error::CoreResult;
use crate::journal::{Journal, JournalEntry};
use crate::schema::Schema;
use crate::tables::Tables;
use crate::types::{Clock, SchemaVersion, SystemClock, Timestamp};
use crate::upgrade::{self, NoChanges, Origin, UpgradePlan};
use keepsake_storage::{FileLog, FileSlot, InMemoryLog, InMemorySlot, LogBackend, SlotBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct Shared {
    pub config: StoreConfig,
    pub clock: Arc<dyn Clock>,
    pub dir: Option<StoreDir>,
    /// Serializes upgrades and connection opens.
    pub upgrade_lock: Mutex<()>,
    /// Serializes collection reconciliation across every registry.
    pub ensure_lock: Mutex<()>,
    /// Lock order: tables before journal.
    pub tables: RwLock<Tables>,
    pub journal: Mutex<Journal>,
    pub connections: Mutex<ConnectionTable>,
    pub validators: RwLock<HashMap<String, Arc<dyn RecordValidator>>>,
    pub session_slot: Arc<dyn SlotBackend>,
}

/// An embedded, versioned document store.
///
/// `Store` is a cheap handle; clones share the same state. Records are
/// read and written through [`Connection`]s opened with
/// [`Store::connect`].
///
/// # Example
///
/// ```rust
/// use keepsake_core::{NewRecord, PlannedOps, SchemaVersion, Store, StructuralOp};
///
/// let store = Store::open_in_memory().unwrap();
/// let plan = PlannedOps(vec![StructuralOp::create_collection("meals")]);
/// let conn = store.connect(SchemaVersion::new(1), &plan).unwrap();
///
/// let meals = conn.collection("meals").unwrap();
/// let id = meals.add(NewRecord::new("user-1").with_field("dish", "soup")).unwrap();
/// assert!(meals.get(&id).unwrap().is_some());
/// ```
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

/// Builds a [`Store`] with a custom clock or backends.
#[derive(Debug, Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl StoreBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the clock used for timestamps.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Opens a file-backed store in the directory at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreLocked` if another process has it open, or
    /// `Corrupted` if the journal cannot be replayed.
    pub fn open(self, path: &Path) -> CoreResult<Store> {
        let dir = StoreDir::open(path, self.config.create_if_missing)?;
        let log = FileLog::open(&dir.journal_path())?;
        let slot = FileSlot::new(&dir.session_path());
        self.build(Box::new(log), Arc::new(slot), Some(dir))
    }

    /// Opens a store that lives only in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; returns a result for symmetry.
    pub fn open_in_memory(self) -> CoreResult<Store> {
        self.build(Box::new(InMemoryLog::new()), Arc::new(InMemorySlot::new()), None)
    }

    /// Opens a store over caller-supplied backends.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the log cannot be replayed.
    pub fn open_with_backends(
        self,
        log: Box<dyn LogBackend>,
        slot: Arc<dyn SlotBackend>,
    ) -> CoreResult<Store> {
        self.build(log, slot, None)
    }

    fn build(
        self,
        log: Box<dyn LogBackend>,
        slot: Arc<dyn SlotBackend>,
        dir: Option<StoreDir>,
    ) -> CoreResult<Store> {
        let (journal, entries) = Journal::open(log, self.config.sync_on_write)?;
        let tables = Tables::replay(entries)?;
        info!(
            version = %tables.schema.version(),
            collections = tables.schema.collections.len(),
            records = tables.record_count(),
            "store opened"
        );

        Ok(Store {
            shared: Arc::new(Shared {
                config: self.config,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                dir,
                upgrade_lock: Mutex::new(()),
                ensure_lock: Mutex::new(()),
                tables: RwLock::new(tables),
                journal: Mutex::new(journal),
                connections: Mutex::new(ConnectionTable::default()),
                validators: RwLock::new(HashMap::new()),
                session_slot: slot,
            }),
        })
    }
}

impl Store {
    /// Opens a file-backed store with default configuration.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::open`].
    pub fn open(path: &Path) -> CoreResult<Self> {
        StoreBuilder::new().open(path)
    }

    /// Opens a file-backed store.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::open`].
    pub fn open_with_config(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        StoreBuilder::new().config(config).open(path)
    }

    /// Opens an in-memory store.
    ///
    /// # Errors
    ///
    /// See [`StoreBuilder::open_in_memory`].
    pub fn open_in_memory() -> CoreResult<Self> {
        StoreBuilder::new().open_in_memory()
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Returns the store directory, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.shared.dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Returns the current schema version.
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        self.shared.tables.read().schema.version()
    }

    /// Returns a copy of the live schema.
    #[must_use]
    pub fn schema(&self) -> Schema {
        self.shared.tables.read().schema.clone()
    }

    pub(crate) fn schema_has_collection(&self, name: &str) -> bool {
        self.shared.tables.read().schema.has_collection(name)
    }

    /// Returns the clock reading used for timestamps.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.shared.clock.now_millis()
    }

    /// Returns the clock used for timestamps.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.shared.clock)
    }

    /// Returns the durable slot holding the session pointer.
    #[must_use]
    pub fn session_slot(&self) -> Arc<dyn SlotBackend> {
        Arc::clone(&self.shared.session_slot)
    }

    /// Opens a connection at `version`.
    ///
    /// At or below the store version the connection opens at the store
    /// version and `plan` is not consulted. Above it, `plan` runs as an
    /// upgrade; other open connections are asked to yield first.
    ///
    /// # Errors
    ///
    /// Returns `SchemaBlocked` if an older connection kept the store open,
    /// or `SchemaUpgradeFailed` if a step failed. The store stays at its
    /// previous version either way.
    pub fn connect(&self, version: SchemaVersion, plan: &dyn UpgradePlan) -> CoreResult<Connection> {
        let _guard = self.shared.upgrade_lock.lock();
        let current = self.version();
        let id = self.shared.connections.lock().register(current);
        let conn = Connection::new(id, self.clone());
        upgrade::run(self, id, Origin::Fresh, version, plan)?;
        debug!(connection = %id, version = %conn.version(), "connection opened");
        Ok(conn)
    }

    /// Opens a connection at whatever version the store has.
    ///
    /// # Errors
    ///
    /// See [`Store::connect`].
    pub fn connect_current(&self) -> CoreResult<Connection> {
        self.connect(SchemaVersion::INITIAL, &NoChanges)
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.shared.connections.lock().open_count()
    }

    /// Registers a validator consulted on every write to `collection`.
    pub fn set_validator(&self, collection: &str, validator: Arc<dyn RecordValidator>) {
        self.shared
            .validators
            .write()
            .insert(collection.to_string(), validator);
    }

    /// Removes the validator for `collection`.
    pub fn clear_validator(&self, collection: &str) {
        self.shared.validators.write().remove(collection);
    }

    pub(crate) fn validator(&self, collection: &str) -> Option<Arc<dyn RecordValidator>> {
        self.shared.validators.read().get(collection).cloned()
    }

    /// Runs `f` under the shared table lock.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Tables) -> CoreResult<T>) -> CoreResult<T> {
        let tables = self.shared.tables.read();
        f(&tables)
    }

    /// Runs `f` under the exclusive table lock. The entry it returns is
    /// journaled before being applied.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&Tables) -> CoreResult<(T, Option<JournalEntry>)>,
    ) -> CoreResult<T> {
        let mut tables = self.shared.tables.write();
        let (value, entry) = f(&tables)?;
        if let Some(entry) = entry {
            self.shared.journal.lock().append(&entry)?;
            tables.apply(entry)?;
        }
        Ok(value)
    }

    /// Rewrites the journal as a single snapshot frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the new journal cannot be written. The old
    /// journal is kept intact in that case.
    pub fn compact(&self) -> CoreResult<CompactionReport> {
        let _guard = self.shared.upgrade_lock.lock();
        let tables = self.shared.tables.write();
        let mut journal = self.shared.journal.lock();

        let before = journal.size()?;
        journal.rewrite(&[tables.snapshot_entry()])?;
        journal.sync()?;
        let after = journal.size()?;

        info!(before_bytes = before, after_bytes = after, "journal compacted");
        Ok(CompactionReport {
            before_bytes: before,
            after_bytes: after,
        })
    }

    /// Compacts when the journal has grown past the configured threshold.
    ///
    /// # Errors
    ///
    /// See [`Store::compact`].
    pub fn compact_if_needed(&self) -> CoreResult<Option<CompactionReport>> {
        let threshold = self.shared.config.compact_threshold_bytes;
        if threshold == 0 || self.journal_size()? <= threshold {
            return Ok(None);
        }
        self.compact().map(Some)
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.shared.journal.lock().size()
    }

    /// Returns a summary of the store contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal size cannot be read.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let collections = {
            let tables = self.shared.tables.read();
            tables
                .schema
                .collections()
                .map(|schema| {
                    let (active, deleted) = tables
                        .data
                        .get(&schema.name)
                        .map_or((0, 0), |data| {
                            let deleted = data.records.values().filter(|r| r.del_flag).count();
                            (data.records.len() - deleted, deleted)
                        });
                    CollectionStats {
                        name: schema.name.clone(),
                        active,
                        deleted,
                        indexes: schema.indexes.keys().cloned().collect(),
                    }
                })
                .collect()
        };
        Ok(StoreStats {
            version: self.version(),
            collections,
            journal_bytes: self.journal_size()?,
            open_connections: self.open_connections(),
        })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

/// Journal sizes around a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Size before compacting.
    pub before_bytes: u64,
    /// Size after compacting.
    pub after_bytes: u64,
}

/// Record counts of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Records without `delFlag`.
    pub active: usize,
    /// Soft-deleted records.
    pub deleted: usize,
    /// Index names.
    pub indexes: Vec<String>,
}

/// A summary of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Schema version.
    pub version: SchemaVersion,
    /// Per-collection counts.
    pub collections: Vec<CollectionStats>,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Open connections.
    pub open_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, VersionChangeResponse};
    use crate::error::CoreError;
    use crate::record::NewRecord;
    use crate::upgrade::{PlannedOps, StructuralOp};
    use tempfile::tempdir;

    fn meals_plan() -> PlannedOps {
        PlannedOps(vec![StructuralOp::create_collection("meals")])
    }

    #[test]
    fn fresh_store_is_at_initial_version() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.version(), SchemaVersion::INITIAL);
        assert!(store.schema().collection_names().is_empty());
        assert!(store.path().is_none());
    }

    #[test]
    fn connect_higher_version_upgrades() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connect(SchemaVersion::new(1), &meals_plan()).unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.version(), SchemaVersion::new(1));
        assert!(store.schema().has_collection("meals"));
    }

    #[test]
    fn connect_lower_version_opens_at_current() {
        let store = Store::open_in_memory().unwrap();
        let first = store.connect(SchemaVersion::new(3), &meals_plan()).unwrap();
        drop(first);

        let plan = PlannedOps(vec![StructuralOp::create_collection("never")]);
        let conn = store.connect(SchemaVersion::new(1), &plan).unwrap();
        assert_eq!(conn.version(), SchemaVersion::new(3));
        assert!(!store.schema().has_collection("never"));
    }

    #[test]
    fn older_connection_without_handler_blocks() {
        let store = Store::open_in_memory().unwrap();
        let old = store.connect(SchemaVersion::new(1), &meals_plan()).unwrap();

        let plan = PlannedOps(vec![StructuralOp::create_collection("periods")]);
        let err = store.connect(SchemaVersion::new(2), &plan).unwrap_err();
        assert!(matches!(err, CoreError::SchemaBlocked { blocking: 1, .. }));
        assert_eq!(store.version(), SchemaVersion::new(1));
        assert!(!store.schema().has_collection("periods"));
        assert!(old.is_open());
        assert_eq!(store.open_connections(), 1);
    }

    #[test]
    fn older_connection_that_yields_is_closed() {
        let store = Store::open_in_memory().unwrap();
        let old = store.connect(SchemaVersion::new(1), &meals_plan()).unwrap();
        old.on_version_change(|_| VersionChangeResponse::Close);

        let plan = PlannedOps(vec![StructuralOp::create_collection("periods")]);
        let new = store.connect(SchemaVersion::new(2), &plan).unwrap();
        assert_eq!(new.version(), SchemaVersion::new(2));
        assert_eq!(old.state(), ConnectionState::Closed);
        assert!(matches!(
            old.collection("meals"),
            Err(CoreError::ConnectionClosed { .. })
        ));
    }

    #[test]
    fn file_store_survives_reopen() {
        let temp = tempdir().unwrap();
        {
            let store = Store::open(temp.path()).unwrap();
            let conn = store.connect(SchemaVersion::new(1), &meals_plan()).unwrap();
            conn.collection("meals")
                .unwrap()
                .add(NewRecord::new("u").with_id("m1"))
                .unwrap();
        }

        let store = Store::open(temp.path()).unwrap();
        assert_eq!(store.version(), SchemaVersion::new(1));
        let conn = store.connect_current().unwrap();
        assert!(conn.collection("meals").unwrap().get("m1").unwrap().is_some());
        assert_eq!(store.path().as_deref(), Some(temp.path()));
    }

    #[test]
    fn second_process_handle_is_locked() {
        let temp = tempdir().unwrap();
        let _store = Store::open(temp.path()).unwrap();
        assert!(matches!(Store::open(temp.path()), Err(CoreError::StoreLocked)));
    }

    #[test]
    fn compact_shrinks_journal_and_keeps_state() {
        let temp = tempdir().unwrap();
        {
            let store = Store::open(temp.path()).unwrap();
            let conn = store.connect(SchemaVersion::new(1), &meals_plan()).unwrap();
            let meals = conn.collection("meals").unwrap();
            let id = meals.add(NewRecord::new("u")).unwrap();
            for i in 0..20 {
                let patch = serde_json::json!({ "n": i });
                meals.update(&id, patch.as_object().unwrap()).unwrap();
            }

            let report = store.compact().unwrap();
            assert!(report.after_bytes < report.before_bytes);
            assert_eq!(store.journal_size().unwrap(), report.after_bytes);
        }

        let store = Store::open(temp.path()).unwrap();
        let conn = store.connect_current().unwrap();
        let records = conn
            .collection("meals")
            .unwrap()
            .list_by_owner("u")
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["n"], 19);
        assert_eq!(store.stats().unwrap().collections[0].indexes.len(), 0);
    }

    #[test]
    fn compact_if_needed_respects_threshold() {
        let store = Store::builder()
            .config(StoreConfig::new().compact_threshold_bytes(0))
            .open_in_memory()
            .unwrap();
        assert!(store.compact_if_needed().unwrap().is_none());

        let store = Store::builder()
            .config(StoreConfig::new().compact_threshold_bytes(1))
            .open_in_memory()
            .unwrap();
        let _conn = store.connect(SchemaVersion::new(1), &meals_plan()).unwrap();
        assert!(store.compact_if_needed().unwrap().is_some());
    }

    #[test]
    fn stats_count_active_and_deleted() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connect(SchemaVersion::new(1), &meals_plan()).unwrap();
        let meals = conn.collection("meals").unwrap();
        meals.add(NewRecord::new("u").with_id("a")).unwrap();
        meals.add(NewRecord::new("u").with_id("b")).unwrap();
        meals.soft_delete("b").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.version, SchemaVersion::new(1));
        assert_eq!(stats.collections[0].active, 1);
        assert_eq!(stats.collections[0].deleted, 1);
        assert_eq!(stats.open_connections, 1);
    }
}
