//! Remote object names.
//!
//! Every object lives under
//! `attachments/<recordType>/<recordId>/<disambiguator>-<sanitizedName>`.
//! The remote name is the only durable link to the bytes, so this layout
//! must not change.

use crate::error::{SyncError, SyncResult};
use std::fmt;
use uuid::Uuid;

/// Root prefix of every attachment object.
pub const ATTACHMENTS_ROOT: &str = "attachments";

const MAX_NAME_LEN: usize = 96;

/// The `(recordType, recordId)` pair scoping a record's attachments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteNamespace {
    record_type: String,
    record_id: String,
}

impl RemoteNamespace {
    /// Creates a namespace.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if either part is empty or would escape
    /// its path segment.
    pub fn new(record_type: impl Into<String>, record_id: impl Into<String>) -> SyncResult<Self> {
        let record_type = record_type.into();
        let record_id = record_id.into();
        for (what, value) in [("record type", &record_type), ("record id", &record_id)] {
            if value.is_empty() {
                return Err(SyncError::validation(format!("{what} must not be empty")));
            }
            if value.contains('/') || value == "." || value == ".." {
                return Err(SyncError::validation(format!(
                    "{what} {value:?} is not a valid path segment"
                )));
            }
        }
        Ok(Self {
            record_type,
            record_id,
        })
    }

    /// The record type.
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// The record id.
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// The prefix shared by every object in this namespace, with a
    /// trailing slash.
    pub fn prefix(&self) -> String {
        format!("{ATTACHMENTS_ROOT}/{}/{}/", self.record_type, self.record_id)
    }

    /// The full remote name of `object_name` in this namespace.
    pub fn remote_name(&self, object_name: &str) -> String {
        format!("{}{object_name}", self.prefix())
    }

    /// Returns true if `remote_name` lies in this namespace.
    pub fn contains(&self, remote_name: &str) -> bool {
        remote_name.starts_with(&self.prefix())
    }
}

impl fmt::Display for RemoteNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.record_id)
    }
}

/// Reduces a file name to `[A-Za-z0-9._-]`.
///
/// Other characters become `_`, runs of `_` collapse, leading dots are
/// dropped and the result is cut to a bounded length with the extension
/// kept. An empty result becomes `file`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches('_').trim_start_matches('.');
    if trimmed.is_empty() {
        return "file".to_string();
    }
    if trimmed.len() <= MAX_NAME_LEN {
        return trimmed.to_string();
    }
    match trimmed.rfind('.') {
        Some(dot) if trimmed.len() - dot <= 10 => {
            let ext = &trimmed[dot..];
            format!("{}{ext}", &trimmed[..MAX_NAME_LEN - ext.len()])
        }
        _ => trimmed[..MAX_NAME_LEN].to_string(),
    }
}

/// A fresh disambiguator: twelve lowercase hex digits.
pub fn new_disambiguator() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..12].to_string()
}

/// The object name for `original_name` under `disambiguator`.
pub fn object_name(disambiguator: &str, original_name: &str) -> String {
    format!("{disambiguator}-{}", sanitize_file_name(original_name))
}
