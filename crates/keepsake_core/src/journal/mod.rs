//! Append-only journal persisting the store.
//!
//! Every mutation is one frame. On open the whole journal is replayed to
//! rebuild the in-memory tables.
//!
//! ## Frame Format
//!
//! ```text
//! | magic "KSJ1" (4) | length (4, LE) | CBOR payload (N) | crc32 (4, LE) |
//! ```
//!
//! ## Recovery Policy
//!
//! - A trailing frame cut short by a crash is discarded and the journal is
//!   truncated back to the last complete frame.
//! - A bad magic, checksum mismatch or undecodable payload aborts the open
//!   with `Corrupted`. No repair is attempted.
//!
//! An upgrade commits as a single `Upgrade` frame, so a crash mid-upgrade
//! leaves either the old version or the new one.

mod entry;
mod frame;

pub use entry::{SchemaChange, StoredRecord};
pub use frame::{compute_crc32, FRAME_MAGIC};

pub(crate) use entry::JournalEntry;

use crate::error::CoreResult;
use frame::{decode_log, encode_frame};
use keepsake_storage::LogBackend;
use tracing::{debug, warn};

/// Writer side of the journal.
pub(crate) struct Journal {
    backend: Box<dyn LogBackend>,
    sync_on_write: bool,
}

impl Journal {
    /// Opens the journal and returns every complete entry.
    pub fn open(
        mut backend: Box<dyn LogBackend>,
        sync_on_write: bool,
    ) -> CoreResult<(Self, Vec<JournalEntry>)> {
        let data = backend.load()?;
        let decoded = decode_log(&data)?;
        if decoded.has_torn_tail(data.len()) {
            warn!(
                valid_bytes = decoded.valid_len,
                discarded_bytes = data.len() as u64 - decoded.valid_len,
                "discarding torn journal tail"
            );
            backend.truncate(decoded.valid_len)?;
            backend.sync()?;
        }
        debug!(entries = decoded.entries.len(), "journal replayed");

        Ok((
            Self {
                backend,
                sync_on_write,
            },
            decoded.entries,
        ))
    }

    /// Appends one entry and returns its offset.
    pub fn append(&mut self, entry: &JournalEntry) -> CoreResult<u64> {
        let frame = encode_frame(entry)?;
        let offset = self.backend.append(&frame)?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        Ok(offset)
    }

    /// Atomically replaces the journal with `entries`.
    pub fn rewrite(&mut self, entries: &[JournalEntry]) -> CoreResult<()> {
        let mut contents = Vec::new();
        for entry in entries {
            contents.extend(encode_frame(entry)?);
        }
        self.backend.rewrite(&contents)?;
        Ok(())
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Flushes appended frames to durable storage.
    pub fn sync(&mut self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }
}
