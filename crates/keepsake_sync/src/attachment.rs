//! Attachment inputs and the descriptors stored on records.

use crate::error::{SyncError, SyncResult};
use bytes::Bytes;
use keepsake_core::{catalog::ATTACHMENTS_FIELD, Record, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A local file waiting to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFile {
    /// Name as the user picked it.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// File contents.
    pub bytes: Bytes,
}

impl AttachmentFile {
    /// Creates a file, guessing the MIME type from the extension.
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime_type = guess_mime_type(&name).to_string();
        Self {
            name,
            mime_type,
            bytes: bytes.into(),
        }
    }

    /// Overrides the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Size in bytes.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns true if the file has no contents.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns true for image MIME types.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Guesses a MIME type from a file extension.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Metadata linking a record to one uploaded object.
///
/// Stored in the record's `attachments` list. Access URLs are never part
/// of it; only `remote_name` is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    /// Attachment id, unique within the record.
    pub id: String,
    /// Object name in the remote store.
    pub remote_name: String,
    /// File name as the user picked it.
    pub original_name: String,
    /// Size of the uploaded bytes.
    pub size_bytes: u64,
    /// MIME type of the uploaded bytes.
    pub mime_type: String,
    /// When the upload finished.
    pub uploaded_at: Timestamp,
    /// Whether the bytes reached the remote store.
    pub is_uploaded: bool,
}

/// Reads the attachment list of a record. A missing field is an empty
/// list.
///
/// # Errors
///
/// Returns `ValidationFailed` if the field is not a list of descriptors.
pub fn descriptors_of(record: &Record) -> SyncResult<Vec<AttachmentDescriptor>> {
    match record.payload.get(ATTACHMENTS_FIELD) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            SyncError::validation(format!(
                "record {} has a malformed {ATTACHMENTS_FIELD} field: {e}",
                record.id
            ))
        }),
    }
}

/// Renders a descriptor list as the record field value.
///
/// # Errors
///
/// Returns `Codec` if serialization fails.
pub fn descriptors_value(descriptors: &[AttachmentDescriptor]) -> SyncResult<Value> {
    Ok(serde_json::to_value(descriptors)?)
}
