//! Keeps a record's `attachments` list in step with the remote store.

use crate::attachment::{descriptors_of, descriptors_value, AttachmentDescriptor, AttachmentFile};
use crate::error::SyncResult;
use crate::naming::RemoteNamespace;
use crate::pipeline::AttachmentPipeline;
use crate::report::BatchReport;
use keepsake_core::{catalog::ATTACHMENTS_FIELD, CoreError, Payload, RecordStore};
use tracing::info;

/// Uploads and removes attachments of records in one collection.
///
/// The record type of the remote namespace is the collection name.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentLinker<'p> {
    pipeline: &'p AttachmentPipeline,
}

impl<'p> AttachmentLinker<'p> {
    /// Creates a linker over `pipeline`.
    pub fn new(pipeline: &'p AttachmentPipeline) -> Self {
        Self { pipeline }
    }

    /// The attachments currently listed on a record.
    ///
    /// # Errors
    ///
    /// Returns `Store(NotFound)` if the record does not exist.
    pub fn attachments(
        &self,
        records: &RecordStore<'_>,
        record_id: &str,
    ) -> SyncResult<Vec<AttachmentDescriptor>> {
        let record = records
            .get(record_id)?
            .ok_or_else(|| CoreError::not_found(records.name(), record_id))?;
        descriptors_of(&record)
    }

    /// Uploads `files` and appends their descriptors to the record.
    ///
    /// Descriptors of a partial batch are persisted as well.
    ///
    /// # Errors
    ///
    /// Any error of [`AttachmentPipeline::upload_batch`], or a store error
    /// if the record is missing or the update fails.
    pub fn attach(
        &self,
        records: &RecordStore<'_>,
        record_id: &str,
        files: &[AttachmentFile],
    ) -> SyncResult<BatchReport> {
        let mut descriptors = self.attachments(records, record_id)?;
        let namespace = RemoteNamespace::new(records.name(), record_id)?;
        let report = self
            .pipeline
            .upload_batch(files, &namespace, descriptors.len())?;

        descriptors.extend(report.descriptors.iter().cloned());
        self.store(records, record_id, &descriptors)?;
        info!(
            collection = records.name(),
            record = record_id,
            summary = %report.summary(),
            "attachments linked"
        );
        Ok(report)
    }

    /// Deletes one attachment remotely, then drops it from the record.
    ///
    /// Returns false if the record has no attachment with that id.
    ///
    /// # Errors
    ///
    /// Any error of [`AttachmentPipeline::delete`], or a store error. The
    /// descriptor stays on the record if the remote delete fails.
    pub fn detach(
        &self,
        records: &RecordStore<'_>,
        record_id: &str,
        attachment_id: &str,
    ) -> SyncResult<bool> {
        let mut descriptors = self.attachments(records, record_id)?;
        let Some(pos) = descriptors.iter().position(|d| d.id == attachment_id) else {
            return Ok(false);
        };
        self.pipeline.delete(&descriptors[pos].remote_name)?;
        descriptors.remove(pos);
        self.store(records, record_id, &descriptors)?;
        info!(
            collection = records.name(),
            record = record_id,
            attachment = attachment_id,
            "attachment detached"
        );
        Ok(true)
    }

    fn store(
        &self,
        records: &RecordStore<'_>,
        record_id: &str,
        descriptors: &[AttachmentDescriptor],
    ) -> SyncResult<()> {
        let mut patch = Payload::new();
        patch.insert(ATTACHMENTS_FIELD.to_string(), descriptors_value(descriptors)?);
        records.update(record_id, &patch)?;
        Ok(())
    }
}
