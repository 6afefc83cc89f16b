//! Compact command implementation.

use super::{emit, format_size, open_existing};
use crate::OutputFormat;
use keepsake_core::Store;
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Compaction result.
#[derive(Debug, Serialize)]
pub struct CompactResult {
    /// Whether the journal was rewritten.
    pub compacted: bool,
    /// Journal bytes before.
    pub bytes_before: u64,
    /// Journal bytes after.
    pub bytes_after: u64,
    /// Configured threshold for `--if-needed`.
    pub threshold_bytes: u64,
}

/// Rewrites the journal, or with `if_needed` only past the threshold.
pub fn compact(store: &Store, if_needed: bool) -> Result<CompactResult, Box<dyn Error>> {
    let before = store.journal_size()?;
    let report = if if_needed {
        store.compact_if_needed()?
    } else {
        Some(store.compact()?)
    };
    Ok(CompactResult {
        compacted: report.is_some(),
        bytes_before: report.map_or(before, |r| r.before_bytes),
        bytes_after: report.map_or(before, |r| r.after_bytes),
        threshold_bytes: store.config().compact_threshold_bytes,
    })
}

/// Runs the compact command.
pub fn run(path: &Path, if_needed: bool, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let store = open_existing(path)?;
    let result = compact(&store, if_needed)?;
    emit(format, &result, print_text_output)
}

fn print_text_output(result: &CompactResult) {
    if !result.compacted {
        println!(
            "No compaction needed: journal is {} (threshold {})",
            format_size(result.bytes_before),
            format_size(result.threshold_bytes)
        );
        return;
    }
    let saved = result.bytes_before.saturating_sub(result.bytes_after);
    println!("Compaction complete");
    println!("  Size before: {}", format_size(result.bytes_before));
    println!("  Size after:  {}", format_size(result.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if result.bytes_before > 0 {
            saved as f64 / result.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::connect;
    use keepsake_core::{catalog, NewRecord, Payload};

    #[test]
    fn rewriting_shrinks_a_journal_of_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        {
            let conn = connect(&store).unwrap();
            let meals = conn.collection(catalog::MEALS).unwrap();
            let id = meals.add(NewRecord::new("u")).unwrap();
            for i in 0..20 {
                let mut patch = Payload::new();
                patch.insert("n".into(), serde_json::json!(i));
                meals.update(&id, &patch).unwrap();
            }
        }

        let skipped = compact(&store, true).unwrap();
        assert!(!skipped.compacted);

        let result = compact(&store, false).unwrap();
        assert!(result.compacted);
        assert!(result.bytes_after < result.bytes_before);
    }
}
