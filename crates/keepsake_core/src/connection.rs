//! Versioned connections onto a store.

use crate::collection::RecordStore;
use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::store::Store;
use crate::types::SchemaVersion;
use crate::upgrade::{self, Origin, UpgradePlan, UpgradeReport};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lifecycle state of a connection.
///
/// ```text
/// Closed -> Opening -> NeedsUpgrade -> Upgrading -> Open
///                   \-> Open          \-> Blocked  \-> Failed
/// ```
///
/// Only `Open` permits record operations. An open connection that yields
/// to a version change goes to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected.
    Closed,
    /// Registered, version not yet settled.
    Opening,
    /// A higher version was requested than the store has.
    NeedsUpgrade,
    /// Structural changes are being staged.
    Upgrading,
    /// Ready for record operations.
    Open,
    /// An older connection refused to yield.
    Blocked,
    /// A structural step failed.
    Failed,
}

impl ConnectionState {
    /// Returns true if the transition is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Blocked, Closed, Failed, NeedsUpgrade, Open, Opening, Upgrading};
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, NeedsUpgrade | Open | Failed | Closed)
                | (NeedsUpgrade, Upgrading | Blocked | Open | Failed | Closed)
                | (Upgrading, Open | Failed | Closed)
                | (Open, NeedsUpgrade | Closed)
                | (Blocked | Failed, Closed)
        )
    }

    /// Returns true for `Open`.
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::NeedsUpgrade => "needs-upgrade",
            Self::Upgrading => "upgrading",
            Self::Open => "open",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Identifies a connection within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sent to an open connection when another one wants a higher version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    /// The connection being asked to yield.
    pub connection: ConnectionId,
    /// The version it is open at.
    pub current: SchemaVersion,
    /// The version being requested.
    pub requested: SchemaVersion,
}

/// How a connection answers a [`VersionChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionChangeResponse {
    /// Close this connection and let the upgrade proceed.
    Close,
    /// Stay open; the upgrade is reported as blocked.
    KeepOpen,
}

/// Callback deciding whether to yield to a version change.
///
/// Handlers run while the store's upgrade lock is held and must not open
/// new connections or ensure collections.
pub type VersionChangeHandler = Arc<dyn Fn(&VersionChange) -> VersionChangeResponse + Send + Sync>;

pub(crate) struct ConnectionEntry {
    pub version: SchemaVersion,
    pub state: ConnectionState,
    pub handler: Option<VersionChangeHandler>,
}

/// Bookkeeping for every live connection of a store.
#[derive(Default)]
pub(crate) struct ConnectionTable {
    next_id: u64,
    entries: BTreeMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionTable {
    pub fn register(&mut self, version: SchemaVersion) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.entries.insert(
            id,
            ConnectionEntry {
                version,
                state: ConnectionState::Opening,
                handler: None,
            },
        );
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionEntry> {
        self.entries.get(&id)
    }

    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        self.entries
            .get(&id)
            .map_or(ConnectionState::Closed, |e| e.state)
    }

    pub fn transition(&mut self, id: ConnectionId, next: ConnectionState) -> CoreResult<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| CoreError::invalid_operation(format!("{id} is not registered")))?;
        if entry.state == next {
            return Ok(());
        }
        if !entry.state.can_transition_to(next) {
            return Err(CoreError::invalid_operation(format!(
                "{id} cannot go from {} to {next}",
                entry.state
            )));
        }
        debug!(connection = %id, from = %entry.state, to = %next, "connection state change");
        entry.state = next;
        Ok(())
    }

    pub fn set_version(&mut self, id: ConnectionId, version: SchemaVersion) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.version = version;
        }
    }

    pub fn set_handler(&mut self, id: ConnectionId, handler: VersionChangeHandler) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.handler = Some(handler);
        }
    }

    pub fn remove(&mut self, id: ConnectionId) {
        self.entries.remove(&id);
    }

    /// Open connections other than `except` that sit below `target`.
    pub fn open_below(
        &self,
        except: ConnectionId,
        target: SchemaVersion,
    ) -> Vec<(ConnectionId, SchemaVersion, Option<VersionChangeHandler>)> {
        self.entries
            .iter()
            .filter(|(id, e)| **id != except && e.state.is_open() && e.version < target)
            .map(|(id, e)| (*id, e.version, e.handler.clone()))
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.entries.values().filter(|e| e.state.is_open()).count()
    }
}

/// A versioned handle onto a [`Store`].
///
/// Dropping the connection unregisters it.
pub struct Connection {
    id: ConnectionId,
    store: Store,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, store: Store) -> Self {
        Self { id, store }
    }

    /// Returns the connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the store this connection belongs to.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.store.shared().connections.lock().state(self.id)
    }

    /// Returns true if record operations are allowed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Returns the version this connection is open at.
    #[must_use]
    pub fn version(&self) -> SchemaVersion {
        self.store
            .shared()
            .connections
            .lock()
            .get(self.id)
            .map_or(SchemaVersion::INITIAL, |e| e.version)
    }

    /// Returns a copy of the live schema.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn schema(&self) -> CoreResult<Schema> {
        self.ensure_open()?;
        Ok(self.store.schema())
    }

    /// Registers the handler consulted when another connection requests a
    /// higher version. Without one, the connection keeps the store open
    /// and such upgrades are blocked.
    pub fn on_version_change<F>(&self, handler: F)
    where
        F: Fn(&VersionChange) -> VersionChangeResponse + Send + Sync + 'static,
    {
        self.store
            .shared()
            .connections
            .lock()
            .set_handler(self.id, Arc::new(handler));
    }

    /// Upgrades the store to `target` through this connection.
    ///
    /// Other open connections are asked to yield first. On any failure
    /// this connection stays open at the old version.
    ///
    /// # Errors
    ///
    /// Returns `SchemaBlocked` or `SchemaUpgradeFailed`, or
    /// `ConnectionClosed` if this connection is not open.
    pub fn upgrade(&self, target: SchemaVersion, plan: &dyn UpgradePlan) -> CoreResult<UpgradeReport> {
        let _guard = self.store.shared().upgrade_lock.lock();
        self.ensure_open()?;
        upgrade::run(&self.store, self.id, Origin::Existing, target, plan)
    }

    /// Upgrades the store to one past whatever version it has once the
    /// upgrade lock is held.
    ///
    /// # Errors
    ///
    /// See [`Connection::upgrade`].
    pub fn upgrade_next(&self, plan: &dyn UpgradePlan) -> CoreResult<UpgradeReport> {
        let _guard = self.store.shared().upgrade_lock.lock();
        self.ensure_open()?;
        let target = self.store.version().next();
        upgrade::run(&self.store, self.id, Origin::Existing, target, plan)
    }

    /// Opens a record store over the named collection.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open, or
    /// `CollectionNotFound` if the collection does not exist.
    pub fn collection(&self, name: &str) -> CoreResult<RecordStore<'_>> {
        self.ensure_open()?;
        if !self.store.schema_has_collection(name) {
            return Err(CoreError::collection_not_found(name));
        }
        Ok(RecordStore::new(self, name))
    }

    /// Closes the connection. Closing twice is a no-op.
    pub fn close(&self) {
        let mut connections = self.store.shared().connections.lock();
        if connections.state(self.id) != ConnectionState::Closed {
            if let Err(err) = connections.transition(self.id, ConnectionState::Closed) {
                debug!(connection = %self.id, error = %err, "close ignored");
            }
        }
    }

    /// Checks the connection is open. While another thread is upgrading
    /// through this connection, waits for the upgrade to settle first.
    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        let mut state = self.state();
        if matches!(state, ConnectionState::NeedsUpgrade | ConnectionState::Upgrading) {
            drop(self.store.shared().upgrade_lock.lock());
            state = self.state();
        }
        match state {
            ConnectionState::Open => Ok(()),
            state => Err(CoreError::ConnectionClosed {
                state: state.to_string(),
            }),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("version", &self.version())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.store.shared().connections.lock().remove(self.id);
    }
}
