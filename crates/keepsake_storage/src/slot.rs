//! Single-value durable slots.
//!
//! A slot holds one opaque value that is always replaced as a whole. The
//! session resolver keeps its current-user pointer in one so that the
//! pointer survives restarts without living inside a record collection.

use crate::error::StorageResult;
use crate::file::sync_parent_dir;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A durable single-value store.
pub trait SlotBackend: Send + Sync {
    /// Returns the stored value, or `None` if the slot is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be read.
    fn read(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the stored value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be made durable.
    fn write(&self, value: &[u8]) -> StorageResult<()>;

    /// Empties the slot. Clearing an empty slot is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be cleared.
    fn clear(&self) -> StorageResult<()>;
}

/// A slot held in memory. Clones share the value.
#[derive(Debug, Default, Clone)]
pub struct InMemorySlot {
    value: Arc<RwLock<Option<Vec<u8>>>>,
}

impl InMemorySlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotBackend for InMemorySlot {
    fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.value.read().clone())
    }

    fn write(&self, value: &[u8]) -> StorageResult<()> {
        *self.value.write() = Some(value.to_vec());
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        *self.value.write() = None;
        Ok(())
    }
}

/// A slot stored in its own file, replaced by write-then-rename.
#[derive(Debug)]
pub struct FileSlot {
    path: PathBuf,
    // Serializes writers so two temp files never race on rename.
    write_lock: Mutex<()>,
}

impl FileSlot {
    /// Creates a slot backed by the file at `path`.
    ///
    /// The file is created lazily on the first write.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the slot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SlotBackend for FileSlot {
    fn read(&self) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, value: &[u8]) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("slot.tmp");
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(value)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        sync_parent_dir(&self.path)?;
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                sync_parent_dir(&self.path)?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
