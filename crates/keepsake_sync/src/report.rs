//! Batch outcomes and progress.

use crate::attachment::AttachmentDescriptor;
use std::fmt;

/// Why one file of a batch was not uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    /// File name as given.
    pub name: String,
    /// Error message.
    pub error: String,
    /// Whether retrying the file may succeed.
    pub retryable: bool,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

/// Overall status of a batch that uploaded at least one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every file was uploaded.
    Complete,
    /// Some files failed.
    Partial {
        /// Files uploaded.
        succeeded: usize,
        /// Files not uploaded.
        failed: usize,
    },
}

/// The result of an upload batch.
///
/// Descriptors of uploaded files must be persisted even when the batch
/// is partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Descriptors of uploaded files, in input order.
    pub descriptors: Vec<AttachmentDescriptor>,
    /// Files that were not uploaded.
    pub failures: Vec<FileFailure>,
}

impl BatchReport {
    /// Number of files in the batch.
    pub fn total(&self) -> usize {
        self.descriptors.len() + self.failures.len()
    }

    /// The batch status.
    pub fn status(&self) -> BatchStatus {
        if self.failures.is_empty() {
            BatchStatus::Complete
        } else {
            BatchStatus::Partial {
                succeeded: self.descriptors.len(),
                failed: self.failures.len(),
            }
        }
    }

    /// Returns true if every file was uploaded.
    pub fn is_complete(&self) -> bool {
        self.status() == BatchStatus::Complete
    }

    /// A one-line summary such as `2 of 3 succeeded`.
    pub fn summary(&self) -> String {
        format!("{} of {} succeeded", self.descriptors.len(), self.total())
    }
}

/// Progress of a running batch, reported after each file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    /// Files uploaded so far.
    pub done: usize,
    /// Files failed so far.
    pub failed: usize,
    /// Files in the batch.
    pub total: usize,
    /// The file just processed.
    pub current: Option<String>,
}

impl BatchProgress {
    pub(crate) fn start(total: usize) -> Self {
        Self {
            done: 0,
            failed: 0,
            total,
            current: None,
        }
    }

    /// Files processed so far.
    pub fn processed(&self) -> usize {
        self.done + self.failed
    }

    /// Fraction processed, between 0.0 and 1.0.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed() as f64 / self.total as f64
    }

    /// Returns true once every file is processed.
    pub fn is_finished(&self) -> bool {
        self.processed() >= self.total
    }
}

/// Receives progress after each file.
pub type ProgressCallback = Box<dyn Fn(&BatchProgress) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> AttachmentDescriptor {
        AttachmentDescriptor {
            id: id.into(),
            remote_name: format!("attachments/meals/m/{id}"),
            original_name: id.into(),
            size_bytes: 1,
            mime_type: "text/plain".into(),
            uploaded_at: 0,
            is_uploaded: true,
        }
    }

    #[test]
    fn status_and_summary() {
        let mut report = BatchReport {
            descriptors: vec![descriptor("a"), descriptor("c")],
            failures: Vec::new(),
        };
        assert_eq!(report.status(), BatchStatus::Complete);
        assert_eq!(report.summary(), "2 of 2 succeeded");

        report.failures.push(FileFailure {
            name: "b".into(),
            error: "503".into(),
            retryable: true,
        });
        assert_eq!(
            report.status(),
            BatchStatus::Partial {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(report.summary(), "2 of 3 succeeded");
        assert!(!report.is_complete());
        assert_eq!(report.failures[0].to_string(), "b: 503");
    }

    #[test]
    fn progress_fraction() {
        let mut progress = BatchProgress::start(4);
        assert_eq!(progress.fraction(), 0.0);
        progress.done = 2;
        progress.failed = 1;
        assert!((progress.fraction() - 0.75).abs() < f64::EPSILON);
        assert!(!progress.is_finished());
        progress.done = 3;
        assert!(progress.is_finished());
    }
}
