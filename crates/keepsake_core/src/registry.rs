//! The collection registry.
//!
//! Features declare the collections they need; the registry reconciles the
//! live schema against those declarations, delegating any missing piece to
//! a single version upgrade.

use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use crate::schema::{CollectionSpec, SchemaDelta};
use crate::types::SchemaVersion;
use crate::upgrade::{PlannedOps, StructuralOp};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// What [`CollectionRegistry::ensure_collections`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Everything required already existed.
    AlreadyPresent,
    /// An upgrade created what was missing.
    Upgraded {
        /// Version before.
        from: SchemaVersion,
        /// Version after.
        to: SchemaVersion,
    },
}

/// Tracks required collections and creates missing ones on demand.
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    declared: RwLock<BTreeMap<String, Vec<CollectionSpec>>>,
}

impl CollectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the collections a feature needs. Declaring the same feature
    /// again replaces its list.
    pub fn declare(&self, feature: &str, specs: Vec<CollectionSpec>) {
        debug!(feature, collections = specs.len(), "collections declared");
        self.declared.write().insert(feature.to_string(), specs);
    }

    /// Returns the names of declaring features.
    #[must_use]
    pub fn features(&self) -> Vec<String> {
        self.declared.read().keys().cloned().collect()
    }

    /// Returns every declared collection, merged by name.
    #[must_use]
    pub fn declared(&self) -> Vec<CollectionSpec> {
        let mut merged: BTreeMap<String, CollectionSpec> = BTreeMap::new();
        for spec in self.declared.read().values().flatten() {
            match merged.get_mut(&spec.name) {
                Some(existing) => {
                    for index in &spec.indexes {
                        *existing = existing.clone().with_index(index.clone());
                    }
                }
                None => {
                    merged.insert(spec.name.clone(), spec.clone());
                }
            }
        }
        merged.into_values().collect()
    }

    /// Computes what the live schema lacks, without changing anything.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn missing(&self, conn: &Connection, required: &[CollectionSpec]) -> CoreResult<SchemaDelta> {
        Ok(conn.schema()?.missing(required))
    }

    /// Makes sure every collection and index in `required` exists.
    ///
    /// Anything missing is created by one upgrade to the next version.
    /// Callers on the same store queue behind each other and re-check,
    /// whichever registry they go through, so the same requirement never
    /// costs two upgrades.
    ///
    /// # Errors
    ///
    /// Returns `SchemaBlocked` or `SchemaUpgradeFailed` from the upgrade,
    /// or `SchemaVerificationFailed` if something is still missing after
    /// it.
    pub fn ensure_collections(
        &self,
        conn: &Connection,
        required: &[CollectionSpec],
    ) -> CoreResult<EnsureOutcome> {
        let _guard = conn.store().shared().ensure_lock.lock();
        let delta = self.missing(conn, required)?;
        if delta.is_empty() {
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        info!(missing = ?delta.describe(), "creating missing collections");
        let report = conn.upgrade_next(&PlannedOps(StructuralOp::for_delta(&delta)))?;

        let still_missing = self.missing(conn, required)?;
        if !still_missing.is_empty() {
            return Err(CoreError::SchemaVerificationFailed {
                missing: still_missing.describe(),
            });
        }
        Ok(EnsureOutcome::Upgraded {
            from: report.from,
            to: report.to,
        })
    }

    /// Ensures every declared collection exists.
    ///
    /// # Errors
    ///
    /// See [`CollectionRegistry::ensure_collections`].
    pub fn ensure_declared(&self, conn: &Connection) -> CoreResult<EnsureOutcome> {
        let required = self.declared();
        self.ensure_collections(conn, &required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexSpec;
    use crate::store::Store;

    #[test]
    fn second_ensure_is_a_no_op() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connect_current().unwrap();
        let registry = CollectionRegistry::new();
        let required = [CollectionSpec::new("meals")];

        let first = registry.ensure_collections(&conn, &required).unwrap();
        assert_eq!(
            first,
            EnsureOutcome::Upgraded {
                from: SchemaVersion::INITIAL,
                to: SchemaVersion::new(1)
            }
        );
        let second = registry.ensure_collections(&conn, &required).unwrap();
        assert_eq!(second, EnsureOutcome::AlreadyPresent);
        assert_eq!(store.version(), SchemaVersion::new(1));
    }

    #[test]
    fn growing_requirements_bump_once_each() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connect_current().unwrap();
        let registry = CollectionRegistry::new();

        registry
            .ensure_collections(&conn, &[CollectionSpec::new("meals")])
            .unwrap();
        registry
            .ensure_collections(
                &conn,
                &[CollectionSpec::new("meals"), CollectionSpec::new("periods")],
            )
            .unwrap();

        let schema = store.schema();
        assert!(schema.has_collection("meals"));
        assert!(schema.has_collection("periods"));
        assert_eq!(store.version(), SchemaVersion::new(2));
        assert_eq!(conn.version(), SchemaVersion::new(2));
    }

    #[test]
    fn declared_specs_merge_indexes() {
        let registry = CollectionRegistry::new();
        registry.declare("meals", vec![CollectionSpec::new("meals")]);
        registry.declare(
            "timeline",
            vec![CollectionSpec::bare("meals").with_index(IndexSpec::by_created_at())],
        );

        let declared = registry.declared();
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].indexes.len(), 2);
        assert_eq!(registry.features(), vec!["meals", "timeline"]);
    }

    #[test]
    fn repeated_collection_in_one_call_gets_every_index() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connect_current().unwrap();
        let registry = CollectionRegistry::new();

        let outcome = registry
            .ensure_collections(
                &conn,
                &[CollectionSpec::bare("meals"), CollectionSpec::new("meals")],
            )
            .unwrap();
        assert!(matches!(outcome, EnsureOutcome::Upgraded { .. }));
        assert!(store.schema().collection("meals").unwrap().has_index("by_owner"));
        assert_eq!(store.version(), SchemaVersion::new(1));
    }

    #[test]
    fn ensure_declared_creates_everything() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connect_current().unwrap();
        let registry = CollectionRegistry::new();
        registry.declare("a", vec![CollectionSpec::new("meals")]);
        registry.declare("b", vec![CollectionSpec::new("stools")]);

        registry.ensure_declared(&conn).unwrap();
        assert!(registry
            .missing(&conn, &registry.declared())
            .unwrap()
            .is_empty());
        assert_eq!(store.version(), SchemaVersion::new(1));
    }

    #[test]
    fn missing_index_on_existing_collection_is_added() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.connect_current().unwrap();
        let registry = CollectionRegistry::new();
        registry
            .ensure_collections(&conn, &[CollectionSpec::bare("meals")])
            .unwrap();

        let required = [CollectionSpec::new("meals")];
        assert_eq!(
            registry.missing(&conn, &required).unwrap().describe(),
            vec!["meals.by_owner".to_string()]
        );
        registry.ensure_collections(&conn, &required).unwrap();
        assert!(store.schema().collection("meals").unwrap().has_index("by_owner"));
    }
}
