//! Init command implementation.

use super::{emit, UserRow};
use crate::OutputFormat;
use keepsake_core::{catalog, EnsureOutcome, Store, StoreConfig, UserDirectory};
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use tracing::info;

/// Init command result.
#[derive(Debug, Serialize)]
pub struct InitResult {
    /// Store path.
    pub path: String,
    /// Schema version after init.
    pub version: u64,
    /// Whether an upgrade created missing collections.
    pub upgraded: bool,
    /// The user seeded by this run, if the store had none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seeded_user: Option<UserRow>,
}

/// Creates the store, its standard collections and a default user.
///
/// Running it again on an initialized store changes nothing.
pub fn init(path: &Path, user_name: &str) -> Result<InitResult, Box<dyn Error>> {
    let store = Store::open_with_config(path, StoreConfig::new().create_if_missing(true))?;
    let conn = store.connect_current()?;
    let upgraded = matches!(
        catalog::standard_registry().ensure_declared(&conn)?,
        EnsureOutcome::Upgraded { .. }
    );
    let seeded = UserDirectory::new(&conn).seed_default_user(user_name)?;
    info!(path = %path.display(), version = %store.version(), "store initialized");
    Ok(InitResult {
        path: path.display().to_string(),
        version: store.version().as_u64(),
        upgraded,
        seeded_user: seeded.as_ref().map(UserRow::from),
    })
}

/// Runs the init command.
pub fn run(path: &Path, user_name: &str, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let result = init(path, user_name)?;
    emit(format, &result, |result| {
        println!("Initialized store at {}", result.path);
        println!("  Schema version: {}", result.version);
        match &result.seeded_user {
            Some(user) => println!("  Default user:   {}", user.line()),
            None => println!("  Users already present, nothing seeded"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_seeds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        let first = init(&path, "Me").unwrap();
        let seeded = first.seeded_user.unwrap();
        assert_eq!(seeded.name, "Me");
        assert!(seeded.is_default);

        let second = init(&path, "Other").unwrap();
        assert!(second.seeded_user.is_none());
        assert!(!second.upgraded);
        assert_eq!(second.version, first.version);
    }
}
