//! # Keepsake Core
//!
//! The embedded, versioned document store behind Keepsake.
//!
//! This crate provides:
//! - A single monotonically increasing schema version per store
//! - Structural upgrades that run once per version and commit atomically
//! - Generic record CRUD with soft delete and per-owner indexing
//! - A collection registry that creates missing collections on demand
//! - User profiles and current-user resolution
//!
//! ## Architecture
//!
//! State lives in in-memory tables rebuilt on open from an append-only
//! journal of CBOR frames. Every write is one frame; every upgrade is one
//! frame. Connections carry the version they were opened at, and only
//! open connections may touch records.
//!
//! ## Example
//!
//! ```rust
//! use keepsake_core::{catalog, NewRecord, SessionResolver, Store, UserDirectory};
//!
//! let store = Store::open_in_memory().unwrap();
//! let conn = store.connect_current().unwrap();
//! catalog::standard_registry().ensure_declared(&conn).unwrap();
//!
//! let me = UserDirectory::new(&conn).seed_default_user("Me").unwrap().unwrap();
//! let session = SessionResolver::for_store(&store);
//! let acting = session.current_user(&conn).unwrap().unwrap();
//! assert_eq!(acting.id, me.id);
//!
//! let meals = conn.collection(catalog::MEALS).unwrap();
//! meals.add(NewRecord::new(&acting.id).with_field("dish", "soup")).unwrap();
//! assert_eq!(meals.list_by_owner(&acting.id).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod catalog;
mod collection;
mod config;
mod connection;
mod dir;
mod error;
mod index;
mod journal;
mod record;
mod registry;
mod schema;
mod session;
mod store;
mod tables;
mod types;
mod upgrade;
mod users;

pub use collection::{ListOptions, RecordStore, RecordValidator};
pub use config::StoreConfig;
pub use connection::{
    Connection, ConnectionId, ConnectionState, VersionChange, VersionChangeHandler,
    VersionChangeResponse,
};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use index::{IndexKey, SecondaryIndex};
pub use journal::{compute_crc32, SchemaChange, StoredRecord, FRAME_MAGIC};
pub use record::{generate_id, NewRecord, Payload, Record, ENVELOPE_FIELDS};
pub use registry::{CollectionRegistry, EnsureOutcome};
pub use schema::{
    CollectionSchema, CollectionSpec, IndexSpec, Schema, SchemaDelta, CREATED_AT_INDEX,
    OWNER_INDEX, PRIMARY_KEY_PATH,
};
pub use session::SessionResolver;
pub use store::{CollectionStats, CompactionReport, Store, StoreBuilder, StoreStats};
pub use types::{Clock, SchemaVersion, SystemClock, Timestamp};
pub use upgrade::{
    BackfillContext, BackfillFn, BackfillSummary, NoChanges, PlannedOps, StructuralOp,
    UpgradePlan, UpgradeReport,
};
pub use users::{CascadeMode, NewUser, ProfileUpdate, RemovalReport, User, UserDirectory};
