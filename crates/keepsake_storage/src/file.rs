//! File-based log backend.

use crate::backend::LogBackend;
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An append-only log stored in a single file.
///
/// # Durability
///
/// - `append` writes through the OS page cache
/// - `sync` calls `File::sync_all()`
/// - `rewrite` writes a sibling temp file, syncs it, renames it over the
///   log and then syncs the parent directory
///
/// # Example
///
/// ```no_run
/// use keepsake_storage::{FileLog, LogBackend};
/// use std::path::Path;
///
/// let mut log = FileLog::open(Path::new("journal.log")).unwrap();
/// log.append(b"frame").unwrap();
/// log.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileLog {
    /// Opens or creates the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Opens or creates the log, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LogBackend for FileLog {
    fn load(&self) -> StorageResult<Vec<u8>> {
        let data = fs::read(&self.path)?;
        Ok(data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(data)?;
        self.size += data.len() as u64;
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        if len > self.size {
            return Err(StorageError::TruncatePastEnd {
                requested: len,
                size: self.size,
            });
        }
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.size = len;
        Ok(())
    }

    fn rewrite(&mut self, contents: &[u8]) -> StorageResult<()> {
        let temp_path = self.temp_path();
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(contents)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        sync_parent_dir(&self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.size = contents.len() as u64;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Syncs the directory holding `path` so a rename is durable.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

/// NTFS journals metadata; there is no directory fsync to issue.
#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) -> StorageResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(log.path(), path);
    }

    #[test]
    fn appended_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            let mut log = FileLog::open(&path).unwrap();
            assert_eq!(log.append(b"first").unwrap(), 0);
            assert_eq!(log.append(b"second").unwrap(), 5);
            log.sync().unwrap();
        }

        let log = FileLog::open(&path).unwrap();
        assert_eq!(log.size().unwrap(), 11);
        assert_eq!(log.load().unwrap(), b"firstsecond");
    }

    #[test]
    fn truncate_cuts_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let mut log = FileLog::open(&path).unwrap();
        log.append(b"complete-partial").unwrap();
        log.truncate(8).unwrap();
        assert_eq!(log.load().unwrap(), b"complete");
        assert_eq!(log.append(b"+").unwrap(), 8);
    }

    #[test]
    fn truncate_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::open(&dir.path().join("journal.log")).unwrap();
        assert!(matches!(
            log.truncate(1),
            Err(StorageError::TruncatePastEnd { .. })
        ));
    }

    #[test]
    fn rewrite_swaps_contents_and_keeps_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let mut log = FileLog::open(&path).unwrap();
        log.append(b"a long history of frames").unwrap();
        log.rewrite(b"snapshot").unwrap();
        assert_eq!(log.size().unwrap(), 8);
        assert_eq!(log.append(b"+next").unwrap(), 8);
        log.sync().unwrap();

        let reopened = FileLog::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), b"snapshot+next");
        assert!(!dir.path().join("journal.log.tmp").exists());
    }

    #[test]
    fn open_with_create_dirs_builds_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store").join("journal.log");
        let log = FileLog::open_with_create_dirs(&path).unwrap();
        assert_eq!(log.size().unwrap(), 0);
        assert!(path.exists());
    }
}
