//! The collections the Keepsake app ships with.

use crate::registry::CollectionRegistry;
use crate::schema::{CollectionSpec, IndexSpec};

/// User profiles.
pub const USERS: &str = "users";
/// Meal diary entries.
pub const MEALS: &str = "meals";
/// Stool diary entries.
pub const STOOLS: &str = "stools";
/// Period tracking entries.
pub const PERIODS: &str = "periods";
/// Symptom diary entries.
pub const SYMPTOMS: &str = "symptoms";

/// Every diary record kind.
pub const RECORD_KINDS: [&str; 4] = [MEALS, STOOLS, PERIODS, SYMPTOMS];

/// Payload field holding a record's attachment descriptors.
pub const ATTACHMENTS_FIELD: &str = "attachments";

/// Index over `isDefault` in the users collection.
pub const DEFAULT_USER_INDEX: &str = "by_default";

/// The users collection.
#[must_use]
pub fn users() -> CollectionSpec {
    CollectionSpec::new(USERS).with_index(IndexSpec::new(DEFAULT_USER_INDEX, "isDefault"))
}

/// A diary collection: owner and creation-time indexes.
#[must_use]
pub fn record_kind(name: &str) -> CollectionSpec {
    CollectionSpec::new(name).with_index(IndexSpec::by_created_at())
}

/// Declarations by feature.
#[must_use]
pub fn standard() -> Vec<(&'static str, Vec<CollectionSpec>)> {
    let mut features = vec![("users", vec![users()])];
    features.extend(RECORD_KINDS.iter().map(|kind| (*kind, vec![record_kind(kind)])));
    features
}

/// A registry holding every standard declaration.
#[must_use]
pub fn standard_registry() -> CollectionRegistry {
    let registry = CollectionRegistry::new();
    for (feature, specs) in standard() {
        registry.declare(feature, specs);
    }
    registry
}
