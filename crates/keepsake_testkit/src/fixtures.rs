//! Test fixtures and store helpers.
//!
//! Provides stores over memory or a temporary directory, wired to a
//! [`ManualClock`], that can be reopened to exercise journal recovery.

use crate::clock::ManualClock;
use keepsake_core::{catalog, Connection, NewRecord, SessionResolver, Store, StoreConfig};
use keepsake_storage::{InMemoryLog, InMemorySlot};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

enum Backing {
    Memory { log: InMemoryLog, slot: InMemorySlot },
    File { dir: TempDir },
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    /// The clock stamping every write.
    pub clock: ManualClock,
    backing: Backing,
}

impl TestStore {
    /// Creates an in-memory test store.
    pub fn memory() -> Self {
        let clock = ManualClock::default();
        let log = InMemoryLog::new();
        let slot = InMemorySlot::new();
        let store = Self::open_memory(&clock, &log, &slot);
        Self {
            store,
            clock,
            backing: Backing::Memory { log, slot },
        }
    }

    /// Creates a store in a fresh temporary directory.
    pub fn file() -> Self {
        let clock = ManualClock::default();
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = Self::open_file(&clock, &dir);
        Self {
            store,
            clock,
            backing: Backing::File { dir },
        }
    }

    fn open_memory(clock: &ManualClock, log: &InMemoryLog, slot: &InMemorySlot) -> Store {
        Store::builder()
            .config(StoreConfig::new().sync_on_write(false))
            .clock(clock.shared())
            .open_with_backends(Box::new(log.clone()), Arc::new(slot.clone()))
            .expect("Failed to open in-memory store")
    }

    fn open_file(clock: &ManualClock, dir: &TempDir) -> Store {
        Store::builder()
            .clock(clock.shared())
            .open(dir.path())
            .expect("Failed to open file store")
    }

    /// Drops the store and opens it again over the same bytes.
    ///
    /// Every connection to the old store must be dropped first.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self {
            store,
            clock,
            backing,
        } = self;
        drop(store);
        let store = match &backing {
            Backing::Memory { log, slot } => Self::open_memory(&clock, log, slot),
            Backing::File { dir } => Self::open_file(&clock, dir),
        };
        Self {
            store,
            clock,
            backing,
        }
    }

    /// Returns the raw journal of an in-memory store.
    pub fn log(&self) -> Option<&InMemoryLog> {
        match &self.backing {
            Backing::Memory { log, .. } => Some(log),
            Backing::File { .. } => None,
        }
    }

    /// Returns the directory path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::Memory { .. } => None,
            Backing::File { dir } => Some(dir.path().to_path_buf()),
        }
    }

    /// Opens a connection with every standard collection in place.
    pub fn connect_standard(&self) -> Connection {
        let conn = self
            .store
            .connect_current()
            .expect("Failed to open connection");
        catalog::standard_registry()
            .ensure_declared(&conn)
            .expect("Failed to create standard collections");
        conn
    }

    /// A session resolver over the store's slot.
    pub fn session(&self) -> SessionResolver {
        SessionResolver::for_store(&self.store)
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
pub fn with_memory_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let fixture = TestStore::memory();
    f(&fixture)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let fixture = TestStore::file();
    f(&fixture)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Adds `count` meal records owned by `owner`, one millisecond apart,
    /// and returns their ids.
    pub fn add_meals(fixture: &TestStore, conn: &Connection, owner: &str, count: usize) -> Vec<String> {
        let meals = conn
            .collection(catalog::MEALS)
            .expect("standard collections missing");
        (0..count)
            .map(|i| {
                fixture.clock.advance(1);
                meals
                    .add(NewRecord::new(owner).with_field("dish", format!("dish {i}")))
                    .expect("Failed to add meal")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::{SchemaVersion, UserDirectory};

    #[test]
    fn memory_store_reopens_with_data() {
        let fixture = TestStore::memory();
        {
            let conn = fixture.connect_standard();
            scenarios::add_meals(&fixture, &conn, "u", 3);
        }
        let fixture = fixture.reopen();
        let conn = fixture.store.connect_current().unwrap();
        let meals = conn.collection(catalog::MEALS).unwrap();
        assert_eq!(meals.list_by_owner("u").unwrap().len(), 3);
        assert!(fixture.log().is_some());
    }

    #[test]
    fn file_store_reopens_with_session() {
        let fixture = TestStore::file();
        let user_id = {
            let conn = fixture.connect_standard();
            let user = UserDirectory::new(&conn)
                .seed_default_user("Me")
                .unwrap()
                .unwrap();
            fixture.session().set_current_user(&user.id).unwrap();
            user.id
        };
        let version = fixture.version();
        assert!(version > SchemaVersion::INITIAL);

        let fixture = fixture.reopen();
        assert_eq!(fixture.version(), version);
        assert_eq!(
            fixture.session().current_user_id().unwrap().as_deref(),
            Some(user_id.as_str())
        );
        assert!(fixture.path().is_some());
    }

    #[test]
    fn with_helpers_run_closure() {
        let version = with_memory_store(|fixture| fixture.version());
        assert_eq!(version, SchemaVersion::INITIAL);
        let has_path = with_file_store(|fixture| fixture.path().is_some());
        assert!(has_path);
    }
}
