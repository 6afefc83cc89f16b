//! Log backend trait definition.

use crate::error::StorageResult;

/// An append-only byte log.
///
/// The core journal is the only writer. It appends whole frames, replays
/// the entire log on open, cuts off a torn tail after a crash and, when
/// compacting, replaces the log with a snapshot.
///
/// # Invariants
///
/// - `append` returns the offset the data starts at
/// - `load` returns every byte appended since the last `rewrite`
/// - `rewrite` is all-or-nothing: a crash leaves either the old or the
///   new contents, never a mix
/// - Backends must be `Send + Sync` so a store can be shared across threads
pub trait LogBackend: Send + Sync {
    /// Reads the whole log.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying medium cannot be read.
    fn load(&self) -> StorageResult<Vec<u8>>;

    /// Appends `data` at the end of the log and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Cuts the log down to `len` bytes.
    ///
    /// Used on open to drop a partially written trailing frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncatePastEnd`] if `len` exceeds
    /// the current size.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Atomically replaces the whole log with `contents`.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement cannot be made durable.
    fn rewrite(&mut self, contents: &[u8]) -> StorageResult<()>;

    /// Makes every appended byte durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;
}
