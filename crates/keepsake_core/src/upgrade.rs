//! Version upgrades.
//!
//! A store moves from one version to the next through an [`UpgradePlan`]:
//! a pure function of the old version returning the structural steps to
//! run. Steps are staged against a copy of the tables and committed as a
//! single journal frame, so a failed step leaves the store exactly at the
//! old version.
//!
//! Before anything is staged, every other open connection below the target
//! is sent a [`VersionChange`]. If any of them keeps the store open the
//! upgrade fails with `SchemaBlocked` and is not retried.

use crate::connection::{ConnectionId, ConnectionState, VersionChange, VersionChangeResponse};
use crate::error::{CoreError, CoreResult};
use crate::journal::{JournalEntry, SchemaChange, StoredRecord};
use crate::record::Record;
use crate::schema::{CollectionSpec, IndexSpec, SchemaDelta, PRIMARY_KEY_PATH};
use crate::store::Store;
use crate::tables::Tables;
use crate::types::{SchemaVersion, Timestamp};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a backfill step can see besides the record.
#[derive(Debug, Clone)]
pub struct BackfillContext {
    /// Collection being backfilled.
    pub collection: String,
    /// Version being upgraded from.
    pub from: SchemaVersion,
    /// Version being upgraded to.
    pub to: SchemaVersion,
    /// Clock reading taken when the upgrade started.
    pub now: Timestamp,
}

/// A backfill step. Returns whether it changed the record.
pub type BackfillFn = Arc<dyn Fn(&mut Record, &BackfillContext) -> CoreResult<bool> + Send + Sync>;

/// One structural step of an upgrade.
#[derive(Clone)]
pub enum StructuralOp {
    /// Create a collection. Skipped if it exists.
    CreateCollection {
        /// Collection name.
        name: String,
        /// Primary key path.
        key_path: String,
    },
    /// Create a secondary index. Skipped if one with this name exists.
    CreateIndex {
        /// Collection the index belongs to.
        collection: String,
        /// Index definition.
        index: IndexSpec,
    },
    /// Rewrite existing records of a collection.
    ///
    /// Backfills must tolerate records that already have the new shape.
    Backfill {
        /// Collection to walk.
        collection: String,
        /// Name shown in reports and logs.
        name: String,
        /// The per-record step.
        step: BackfillFn,
    },
}

impl StructuralOp {
    /// Creates a collection keyed by `id`.
    pub fn create_collection(name: impl Into<String>) -> Self {
        Self::CreateCollection {
            name: name.into(),
            key_path: PRIMARY_KEY_PATH.to_string(),
        }
    }

    /// Creates an index.
    pub fn create_index(collection: impl Into<String>, index: IndexSpec) -> Self {
        Self::CreateIndex {
            collection: collection.into(),
            index,
        }
    }

    /// Creates a collection and all of its indexes.
    #[must_use]
    pub fn create_from_spec(spec: &CollectionSpec) -> Vec<Self> {
        let mut ops = vec![Self::CreateCollection {
            name: spec.name.clone(),
            key_path: spec.key_path.clone(),
        }];
        ops.extend(
            spec.indexes
                .iter()
                .map(|index| Self::create_index(spec.name.clone(), index.clone())),
        );
        ops
    }

    /// The steps that close a [`SchemaDelta`].
    #[must_use]
    pub fn for_delta(delta: &SchemaDelta) -> Vec<Self> {
        let mut ops: Vec<Self> = delta
            .collections
            .iter()
            .flat_map(Self::create_from_spec)
            .collect();
        ops.extend(
            delta
                .indexes
                .iter()
                .map(|(collection, index)| Self::create_index(collection.clone(), index.clone())),
        );
        ops
    }

    /// A backfill step.
    pub fn backfill<F>(collection: impl Into<String>, name: impl Into<String>, step: F) -> Self
    where
        F: Fn(&mut Record, &BackfillContext) -> CoreResult<bool> + Send + Sync + 'static,
    {
        Self::Backfill {
            collection: collection.into(),
            name: name.into(),
            step: Arc::new(step),
        }
    }

    /// Stamps `createdAt` and `updatedAt` on records missing them.
    ///
    /// A missing `createdAt` takes `updatedAt` when present; otherwise both
    /// take the upgrade time.
    pub fn stamp_missing_timestamps(collection: impl Into<String>) -> Self {
        Self::backfill(collection, "stamp_missing_timestamps", |record, ctx| {
            let mut changed = false;
            if record.created_at.is_none() {
                record.created_at = Some(record.updated_at.unwrap_or(ctx.now));
                changed = true;
            }
            if record.updated_at.is_none() {
                record.updated_at = record.created_at;
                changed = true;
            }
            Ok(changed)
        })
    }

    /// Sets `field` to `value` on records that lack it.
    pub fn default_field(
        collection: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        let field = field.into();
        let name = format!("default_field:{field}");
        Self::backfill(collection, name, move |record, _| {
            if record.payload.contains_key(&field) {
                return Ok(false);
            }
            record.payload.insert(field.clone(), value.clone());
            Ok(true)
        })
    }
}

impl fmt::Debug for StructuralOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCollection { name, key_path } => f
                .debug_struct("CreateCollection")
                .field("name", name)
                .field("key_path", key_path)
                .finish(),
            Self::CreateIndex { collection, index } => f
                .debug_struct("CreateIndex")
                .field("collection", collection)
                .field("index", index)
                .finish(),
            Self::Backfill {
                collection, name, ..
            } => f
                .debug_struct("Backfill")
                .field("collection", collection)
                .field("name", name)
                .finish_non_exhaustive(),
        }
    }
}

/// Produces the structural steps for a transition.
pub trait UpgradePlan {
    /// Returns the steps to run when upgrading from `from`.
    fn steps(&self, from: SchemaVersion) -> Vec<StructuralOp>;
}

impl<F> UpgradePlan for F
where
    F: Fn(SchemaVersion) -> Vec<StructuralOp>,
{
    fn steps(&self, from: SchemaVersion) -> Vec<StructuralOp> {
        self(from)
    }
}

/// A plan that runs the same steps whatever the old version.
#[derive(Debug, Clone, Default)]
pub struct PlannedOps(pub Vec<StructuralOp>);

impl UpgradePlan for PlannedOps {
    fn steps(&self, _from: SchemaVersion) -> Vec<StructuralOp> {
        self.0.clone()
    }
}

/// A plan with no steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChanges;

impl UpgradePlan for NoChanges {
    fn steps(&self, _from: SchemaVersion) -> Vec<StructuralOp> {
        Vec::new()
    }
}

/// Records changed by one backfill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Backfill name.
    pub name: String,
    /// Collection walked.
    pub collection: String,
    /// Records the step changed.
    pub changed: usize,
}

/// The outcome of an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Version before the request.
    pub from: SchemaVersion,
    /// Version after the request.
    pub to: SchemaVersion,
    /// Structural changes that were applied.
    pub applied: Vec<SchemaChange>,
    /// Structural changes that were already in place.
    pub skipped: Vec<SchemaChange>,
    /// Backfills that ran.
    pub backfills: Vec<BackfillSummary>,
}

impl UpgradeReport {
    fn unchanged(version: SchemaVersion) -> Self {
        Self {
            from: version,
            to: version,
            applied: Vec::new(),
            skipped: Vec::new(),
            backfills: Vec::new(),
        }
    }

    /// Returns true if the version did not move.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Who asked for the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A connection being opened. Failures are terminal for it.
    Fresh,
    /// An already open connection. It stays open on failure.
    Existing,
}

/// Runs an upgrade. The caller holds the store's upgrade lock.
pub(crate) fn run(
    store: &Store,
    requester: ConnectionId,
    origin: Origin,
    target: SchemaVersion,
    plan: &dyn UpgradePlan,
) -> CoreResult<UpgradeReport> {
    let shared = store.shared();
    let current = store.version();

    if target <= current {
        let mut connections = shared.connections.lock();
        connections.set_version(requester, current);
        if connections.state(requester) != ConnectionState::Open {
            connections.transition(requester, ConnectionState::Open)?;
        }
        if target < current {
            debug!(requested = %target, current = %current, "opened below store version");
        }
        return Ok(UpgradeReport::unchanged(current));
    }

    shared
        .connections
        .lock()
        .transition(requester, ConnectionState::NeedsUpgrade)?;

    let blocking = notify_older(store, requester, current, target);
    if blocking > 0 {
        warn!(current = %current, requested = %target, blocking, "schema upgrade blocked");
        settle_failure(store, requester, origin, ConnectionState::Blocked)?;
        return Err(CoreError::SchemaBlocked {
            current,
            requested: target,
            blocking,
        });
    }

    shared
        .connections
        .lock()
        .transition(requester, ConnectionState::Upgrading)?;
    info!(from = %current, to = %target, "upgrading schema");

    match commit(store, current, target, plan) {
        Ok(report) => {
            let mut connections = shared.connections.lock();
            connections.set_version(requester, target);
            connections.transition(requester, ConnectionState::Open)?;
            info!(
                from = %current,
                to = %target,
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                "schema upgrade committed"
            );
            Ok(report)
        }
        Err(err) => {
            warn!(from = %current, to = %target, error = %err, "schema upgrade failed");
            settle_failure(store, requester, origin, ConnectionState::Failed)?;
            Err(match err {
                e @ CoreError::SchemaUpgradeFailed { .. } => e,
                e => CoreError::upgrade_failed(current, target, e.to_string()),
            })
        }
    }
}

fn settle_failure(
    store: &Store,
    requester: ConnectionId,
    origin: Origin,
    terminal: ConnectionState,
) -> CoreResult<()> {
    let next = match origin {
        Origin::Fresh => terminal,
        Origin::Existing => ConnectionState::Open,
    };
    store.shared().connections.lock().transition(requester, next)
}

/// Asks older open connections to yield. Returns how many refused.
fn notify_older(
    store: &Store,
    requester: ConnectionId,
    current: SchemaVersion,
    target: SchemaVersion,
) -> usize {
    let shared = store.shared();
    let older = shared.connections.lock().open_below(requester, target);

    let mut blocking = 0;
    for (id, version, handler) in older {
        let event = VersionChange {
            connection: id,
            current: version.max(current),
            requested: target,
        };
        let response = handler.map_or(VersionChangeResponse::KeepOpen, |h| h(&event));
        match response {
            VersionChangeResponse::Close => {
                match shared.connections.lock().transition(id, ConnectionState::Closed) {
                    Ok(()) => debug!(
                        connection = %id,
                        requested = %target,
                        "connection yielded to version change"
                    ),
                    // Dropped since it was listed.
                    Err(err) => debug!(connection = %id, error = %err, "yield ignored"),
                }
            }
            VersionChangeResponse::KeepOpen => blocking += 1,
        }
    }
    blocking
}

/// Stages every step on a copy of the tables, journals the result as one
/// frame, then swaps the copy in.
fn commit(
    store: &Store,
    from: SchemaVersion,
    to: SchemaVersion,
    plan: &dyn UpgradePlan,
) -> CoreResult<UpgradeReport> {
    let shared = store.shared();
    let ops = plan.steps(from);
    let now = store.now();

    let mut tables = shared.tables.write();
    let mut staged: Tables = tables.clone();
    let mut report = UpgradeReport::unchanged(from);
    report.to = to;
    let mut changes = Vec::new();
    let mut writes: BTreeMap<(String, String), Record> = BTreeMap::new();

    for op in ops {
        match op {
            StructuralOp::CreateCollection { name, key_path } => {
                let change = SchemaChange::CreateCollection { name, key_path };
                stage_change(&mut staged, change, &mut changes, &mut report, from, to)?;
            }
            StructuralOp::CreateIndex { collection, index } => {
                let change = SchemaChange::CreateIndex { collection, index };
                stage_change(&mut staged, change, &mut changes, &mut report, from, to)?;
            }
            StructuralOp::Backfill {
                collection,
                name,
                step,
            } => {
                let ctx = BackfillContext {
                    collection: collection.clone(),
                    from,
                    to,
                    now,
                };
                let records: Vec<Record> = staged
                    .collection(&collection)
                    .map_err(|_| {
                        CoreError::upgrade_failed(
                            from,
                            to,
                            format!("backfill {name}: collection {collection} does not exist"),
                        )
                    })?
                    .records
                    .values()
                    .cloned()
                    .collect();

                let mut changed = 0;
                for mut record in records {
                    let id = record.id.clone();
                    let touched = step(&mut record, &ctx).map_err(|e| {
                        CoreError::upgrade_failed(from, to, format!("backfill {name} on {id}: {e}"))
                    })?;
                    if !touched {
                        continue;
                    }
                    if record.id != id {
                        return Err(CoreError::upgrade_failed(
                            from,
                            to,
                            format!("backfill {name} changed the id of {id}"),
                        ));
                    }
                    staged.put(&collection, record.clone())?;
                    writes.insert((collection.clone(), id), record);
                    changed += 1;
                }
                debug!(backfill = %name, collection = %collection, changed, "backfill staged");
                report.backfills.push(BackfillSummary {
                    name,
                    collection,
                    changed,
                });
            }
        }
    }

    staged.schema.version = to;
    let entry = JournalEntry::Upgrade {
        from,
        to,
        changes,
        writes: writes
            .into_iter()
            .map(|((collection, _), record)| StoredRecord { collection, record })
            .collect(),
    };
    shared.journal.lock().append(&entry)?;
    *tables = staged;
    Ok(report)
}

fn stage_change(
    staged: &mut Tables,
    change: SchemaChange,
    changes: &mut Vec<SchemaChange>,
    report: &mut UpgradeReport,
    from: SchemaVersion,
    to: SchemaVersion,
) -> CoreResult<()> {
    let applied = staged
        .apply_change(&change)
        .map_err(|e| CoreError::upgrade_failed(from, to, format!("{change}: {e}")))?;
    if applied {
        debug!(change = %change, "structural change staged");
        changes.push(change.clone());
        report.applied.push(change);
    } else {
        report.skipped.push(change);
    }
    Ok(())
}
