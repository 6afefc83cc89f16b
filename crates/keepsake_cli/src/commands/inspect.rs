//! Inspect command implementation.

use super::{emit, format_size, open_existing};
use crate::OutputFormat;
use keepsake_core::Store;
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Schema version.
    pub version: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Per-collection counts, in name order.
    pub collections: Vec<CollectionRow>,
}

/// Counts of a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionRow {
    /// Collection name.
    pub name: String,
    /// Active records.
    pub active: usize,
    /// Soft-deleted records.
    pub deleted: usize,
    /// Index names.
    pub indexes: Vec<String>,
}

/// Gathers the inspection result of an open store.
pub fn inspect(store: &Store, path: &Path) -> Result<InspectResult, Box<dyn Error>> {
    let stats = store.stats()?;
    Ok(InspectResult {
        path: path.display().to_string(),
        version: stats.version.as_u64(),
        journal_bytes: stats.journal_bytes,
        collections: stats
            .collections
            .into_iter()
            .map(|c| CollectionRow {
                name: c.name,
                active: c.active,
                deleted: c.deleted,
                indexes: c.indexes,
            })
            .collect(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let store = open_existing(path)?;
    let result = inspect(&store, path)?;
    emit(format, &result, print_text_output)
}

fn print_text_output(result: &InspectResult) {
    println!("Keepsake Store Inspection");
    println!("=========================");
    println!();
    println!("Path:           {}", result.path);
    println!("Schema version: {}", result.version);
    println!("Journal size:   {}", format_size(result.journal_bytes));
    println!();

    if result.collections.is_empty() {
        println!("No collections");
        return;
    }
    println!("Collections:");
    for col in &result.collections {
        println!(
            "  {:<16} {} active, {} deleted",
            col.name, col.active, col.deleted
        );
        if !col.indexes.is_empty() {
            println!("  {:<16} indexes: {}", "", col.indexes.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::connect;
    use keepsake_core::{catalog, NewRecord};

    #[test]
    fn counts_active_and_deleted_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let conn = connect(&store).unwrap();
        let meals = conn.collection(catalog::MEALS).unwrap();
        let kept = meals.add(NewRecord::new("u")).unwrap();
        let gone = meals.add(NewRecord::new("u")).unwrap();
        meals.soft_delete(&gone).unwrap();
        assert!(meals.get(&kept).unwrap().is_some());

        let result = inspect(&store, dir.path()).unwrap();
        assert!(result.version >= 1);
        assert!(result.journal_bytes > 0);
        let row = result
            .collections
            .iter()
            .find(|c| c.name == catalog::MEALS)
            .unwrap();
        assert_eq!((row.active, row.deleted), (1, 1));
    }
}
