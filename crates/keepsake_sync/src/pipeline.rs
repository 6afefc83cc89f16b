//! The attachment upload pipeline.
//!
//! A batch is checked in full before the first network call: a remote
//! must be configured, the session must be authenticated and every file
//! must fit the configured caps. Files are then compressed and uploaded
//! one at a time. A failing file is logged and skipped; an expired
//! session stops the batch.

use crate::attachment::{AttachmentDescriptor, AttachmentFile};
use crate::auth::AuthSession;
use crate::compress::Compressor;
use crate::config::AttachmentConfig;
use crate::error::{SyncError, SyncResult};
use crate::naming::{new_disambiguator, object_name, RemoteNamespace};
use crate::remote::{AccessUrl, ObjectStore};
use crate::report::{BatchProgress, BatchReport, FileFailure, ProgressCallback};
use keepsake_core::{Clock, SystemClock};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Uploads, deletes and resolves attachments in a remote object store.
pub struct AttachmentPipeline {
    config: AttachmentConfig,
    auth: Arc<dyn AuthSession>,
    remote: Option<Arc<dyn ObjectStore>>,
    compressor: Compressor,
    clock: Arc<dyn Clock>,
    progress: Option<ProgressCallback>,
}

impl AttachmentPipeline {
    /// Creates a pipeline with no remote configured.
    pub fn new(config: AttachmentConfig, auth: Arc<dyn AuthSession>) -> Self {
        let compressor = Compressor::new(config.compression.clone());
        Self {
            config,
            auth,
            remote: None,
            compressor,
            clock: Arc::new(SystemClock),
            progress: None,
        }
    }

    /// Sets the object store.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn ObjectStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the clock stamping `uploadedAt`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a callback run after each file of a batch.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BatchProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AttachmentConfig {
        &self.config
    }

    /// Returns true if an object store is configured.
    pub fn is_connected(&self) -> bool {
        self.remote.is_some()
    }

    fn remote(&self) -> SyncResult<&dyn ObjectStore> {
        self.remote.as_deref().ok_or(SyncError::NotConnected)
    }

    fn ensure_ready(&self) -> SyncResult<&dyn ObjectStore> {
        let remote = self.remote()?;
        if !self.auth.is_authenticated() {
            return Err(SyncError::Unauthenticated("sign in to sync attachments".into()));
        }
        Ok(remote)
    }

    /// Checks a batch against the caps without touching the network.
    ///
    /// # Errors
    ///
    /// Returns one `ValidationFailed` listing every violation.
    pub fn validate(&self, files: &[AttachmentFile], existing_count: usize) -> SyncResult<()> {
        let mut violations = Vec::new();
        if files.is_empty() {
            violations.push("batch contains no files".to_string());
        }

        let cap = self.config.max_attachments_per_record;
        if files.len() + existing_count > cap {
            violations.push(format!(
                "{} new and {existing_count} existing attachments exceed the limit of {cap}",
                files.len()
            ));
        }

        let max_bytes = self.config.max_file_bytes;
        violations.extend(files.iter().filter(|f| f.len() > max_bytes).map(|f| {
            format!(
                "{} is {} bytes, over the limit of {max_bytes}",
                f.name,
                f.len()
            )
        }));

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SyncError::ValidationFailed { violations })
        }
    }

    /// Uploads `files` into `namespace`.
    ///
    /// `existing_count` is the number of attachments the record already
    /// has. Returns the report of a batch that uploaded at least one file.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `Unauthenticated` or `ValidationFailed`
    /// before any upload, `Unauthenticated` if the session expires before
    /// the first upload succeeds, or `BatchFailed` if no file was
    /// uploaded.
    pub fn upload_batch(
        &self,
        files: &[AttachmentFile],
        namespace: &RemoteNamespace,
        existing_count: usize,
    ) -> SyncResult<BatchReport> {
        let remote = self.ensure_ready()?;
        self.validate(files, existing_count)?;

        info!(namespace = %namespace, files = files.len(), "uploading attachments");
        let mut progress = BatchProgress::start(files.len());
        let mut report = BatchReport {
            descriptors: Vec::new(),
            failures: Vec::new(),
        };

        for (i, file) in files.iter().enumerate() {
            progress.current = Some(file.name.clone());
            match self.upload_one(remote, namespace, file) {
                Ok(descriptor) => {
                    report.descriptors.push(descriptor);
                    progress.done += 1;
                }
                Err(SyncError::Unauthenticated(message)) => {
                    warn!(file = %file.name, "session expired during upload batch");
                    if report.descriptors.is_empty() {
                        return Err(SyncError::Unauthenticated(message));
                    }
                    for skipped in &files[i..] {
                        report.failures.push(FileFailure {
                            name: skipped.name.clone(),
                            error: format!("not authenticated: {message}"),
                            retryable: false,
                        });
                    }
                    progress.failed += files.len() - i;
                    self.report_progress(&progress);
                    break;
                }
                Err(e) => {
                    warn!(file = %file.name, error = %e, "attachment upload failed");
                    report.failures.push(FileFailure {
                        name: file.name.clone(),
                        error: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                    progress.failed += 1;
                }
            }
            self.report_progress(&progress);
        }

        if report.descriptors.is_empty() {
            warn!(namespace = %namespace, "no attachment of the batch was uploaded");
            return Err(SyncError::BatchFailed {
                failures: report.failures,
            });
        }
        info!(namespace = %namespace, summary = %report.summary(), "attachment batch finished");
        Ok(report)
    }

    fn upload_one(
        &self,
        remote: &dyn ObjectStore,
        namespace: &RemoteNamespace,
        file: &AttachmentFile,
    ) -> SyncResult<AttachmentDescriptor> {
        let compressed = self
            .compressor
            .compress(&file.name, file.bytes.clone(), &file.mime_type);
        let size_bytes = compressed.bytes.len() as u64;
        let object = object_name(&new_disambiguator(), &file.name);
        let remote_name = remote.put(namespace, &object, &compressed.mime_type, compressed.bytes)?;
        debug!(file = %file.name, remote_name = %remote_name, size_bytes, "attachment uploaded");

        Ok(AttachmentDescriptor {
            id: Uuid::new_v4().to_string(),
            remote_name,
            original_name: file.name.clone(),
            size_bytes,
            mime_type: compressed.mime_type,
            uploaded_at: self.clock.now_millis(),
            is_uploaded: true,
        })
    }

    fn report_progress(&self, progress: &BatchProgress) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }

    /// Deletes a remote object. A missing object counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `Unauthenticated` or `Remote`.
    pub fn delete(&self, remote_name: &str) -> SyncResult<()> {
        self.ensure_ready()?.delete(remote_name)?;
        debug!(remote_name, "attachment deleted");
        Ok(())
    }

    /// Resolves a short-lived URL for reading an object.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `Unauthenticated` or `Remote`.
    pub fn access_url(&self, remote_name: &str) -> SyncResult<AccessUrl> {
        self.ensure_ready()?
            .temporary_url(remote_name, self.config.url_ttl)
    }

    /// Lists the remote names stored for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected`, `Unauthenticated`, `Remote`, or
    /// `Unsupported` if the store cannot list.
    pub fn list(&self, namespace: &RemoteNamespace) -> SyncResult<Vec<String>> {
        self.ensure_ready()?.list(namespace)
    }
}

impl fmt::Debug for AttachmentPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentPipeline")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuth;
    use crate::config::CompressionConfig;
    use crate::remote::{InjectedFault, MemoryObjectStore};
    use crate::report::BatchStatus;
    use parking_lot::Mutex;

    fn files(n: usize) -> Vec<AttachmentFile> {
        (0..n)
            .map(|i| AttachmentFile::new(format!("note{i}.txt"), format!("body {i}").into_bytes()))
            .collect()
    }

    fn ns() -> RemoteNamespace {
        RemoteNamespace::new("meals", "m1").unwrap()
    }

    fn pipeline(remote: &Arc<MemoryObjectStore>) -> (AttachmentPipeline, Arc<StaticAuth>) {
        let auth = Arc::new(StaticAuth::new("tok"));
        let config = AttachmentConfig::default().with_compression(CompressionConfig::disabled());
        let pipeline = AttachmentPipeline::new(config, auth.clone())
            .with_remote(remote.clone() as Arc<dyn ObjectStore>);
        (pipeline, auth)
    }

    #[test]
    fn preconditions_fail_without_network_calls() {
        let remote = Arc::new(MemoryObjectStore::new());
        let auth: Arc<dyn AuthSession> = Arc::new(StaticAuth::new("tok"));
        let offline = AttachmentPipeline::new(AttachmentConfig::default(), auth);
        assert!(matches!(
            offline.upload_batch(&files(1), &ns(), 0),
            Err(SyncError::NotConnected)
        ));

        let (pipeline, auth) = pipeline(&remote);
        auth.expire();
        assert!(matches!(
            pipeline.upload_batch(&files(1), &ns(), 0),
            Err(SyncError::Unauthenticated(_))
        ));
        assert_eq!(remote.network_calls(), 0);
    }

    #[test]
    fn validation_lists_every_violation() {
        let remote = Arc::new(MemoryObjectStore::new());
        let (pipeline, _auth) = pipeline(&remote);
        let mut batch = files(2);
        batch.push(AttachmentFile::new("huge.bin", vec![0u8; 10 * 1024 * 1024 + 1]));

        let err = pipeline.upload_batch(&batch, &ns(), 3).unwrap_err();
        match err {
            SyncError::ValidationFailed { violations } => {
                assert_eq!(violations.len(), 2);
                assert!(violations[0].contains("limit of 5"));
                assert!(violations[1].starts_with("huge.bin"));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
        assert!(matches!(
            pipeline.upload_batch(&[], &ns(), 0),
            Err(SyncError::ValidationFailed { .. })
        ));
        assert_eq!(remote.network_calls(), 0);
    }

    #[test]
    fn complete_batch_reports_progress() {
        let remote = Arc::new(MemoryObjectStore::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (pipeline, _auth) = pipeline(&remote);
        let pipeline = pipeline.on_progress(move |p| sink.lock().push(p.clone()));

        let report = pipeline.upload_batch(&files(2), &ns(), 0).unwrap();
        assert_eq!(report.status(), BatchStatus::Complete);
        assert_eq!(remote.len(), 2);
        for descriptor in &report.descriptors {
            assert!(ns().contains(&descriptor.remote_name));
            assert!(descriptor.is_uploaded);
            assert_eq!(descriptor.mime_type, "text/plain");
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].done, 2);
        assert_eq!(seen[1].current.as_deref(), Some("note1.txt"));
        assert!(seen[1].is_finished());
    }

    #[test]
    fn per_file_failures_do_not_abort() {
        let remote = Arc::new(MemoryObjectStore::new());
        remote.fail_put(1, InjectedFault::Remote);
        let (pipeline, _auth) = pipeline(&remote);

        let report = pipeline.upload_batch(&files(3), &ns(), 0).unwrap();
        assert_eq!(report.descriptors.len(), 2);
        assert_eq!(report.failures[0].name, "note0.txt");
        assert!(report.failures[0].retryable);
        assert_eq!(report.summary(), "2 of 3 succeeded");
    }

    #[test]
    fn all_failures_is_batch_failed() {
        let remote = Arc::new(MemoryObjectStore::new());
        remote.fail_put(1, InjectedFault::Remote);
        remote.fail_put(2, InjectedFault::Remote);
        let (pipeline, _auth) = pipeline(&remote);

        let err = pipeline.upload_batch(&files(2), &ns(), 0).unwrap_err();
        assert!(matches!(err, SyncError::BatchFailed { ref failures } if failures.len() == 2));
        assert!(err.is_retryable());
    }

    #[test]
    fn expiry_mid_batch_stops_and_keeps_uploads() {
        let remote = Arc::new(MemoryObjectStore::new());
        remote.fail_put(2, InjectedFault::Unauthenticated);
        let (pipeline, _auth) = pipeline(&remote);

        let report = pipeline.upload_batch(&files(4), &ns(), 0).unwrap();
        assert_eq!(report.descriptors.len(), 1);
        assert_eq!(report.failures.len(), 3);
        assert_eq!(remote.put_calls(), 2);
    }

    #[test]
    fn expiry_before_any_upload_is_unauthenticated() {
        let remote = Arc::new(MemoryObjectStore::new());
        remote.fail_put(1, InjectedFault::Unauthenticated);
        let (pipeline, _auth) = pipeline(&remote);

        assert!(matches!(
            pipeline.upload_batch(&files(3), &ns(), 0),
            Err(SyncError::Unauthenticated(_))
        ));
        assert_eq!(remote.put_calls(), 1);
    }

    #[test]
    fn delete_url_and_list() {
        let remote = Arc::new(MemoryObjectStore::new());
        let (pipeline, _auth) = pipeline(&remote);
        let report = pipeline.upload_batch(&files(1), &ns(), 0).unwrap();
        let name = &report.descriptors[0].remote_name;

        let url = pipeline.access_url(name).unwrap();
        assert!(url.url.contains(name.as_str()));
        assert_eq!(pipeline.list(&ns()).unwrap(), vec![name.clone()]);

        pipeline.delete(name).unwrap();
        pipeline.delete(name).unwrap();
        assert!(pipeline.list(&ns()).unwrap().is_empty());
    }
}
