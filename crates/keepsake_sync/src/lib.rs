//! # Keepsake Sync
//!
//! Attachment upload and remote object sync for Keepsake.
//!
//! This crate provides:
//! - Batch uploads with up-front validation and partial-failure reports
//! - Best-effort image compression before upload
//! - Stable remote names scoped by `(recordType, recordId)`
//! - Short-lived access URLs that are never persisted
//! - An HTTP object store over an injected client
//! - Record linkage through the `attachments` field
//!
//! ## Key Invariants
//!
//! - Nothing touches the network until the whole batch is validated
//! - Files upload one at a time, in order
//! - A failing file never aborts the batch; an expired session does
//! - Uploaded descriptors of a partial batch are always returned

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachment;
mod auth;
mod compress;
mod config;
mod error;
mod http;
mod linker;
mod naming;
mod pipeline;
mod remote;
mod report;

pub use attachment::{
    descriptors_of, descriptors_value, guess_mime_type, AttachmentDescriptor, AttachmentFile,
};
pub use auth::{AuthSession, StaticAuth};
pub use compress::{Compressed, Compressor};
pub use config::{AttachmentConfig, CompressionConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpObjectStore, HttpRequest, HttpResponse, Method};
pub use linker::AttachmentLinker;
pub use naming::{
    new_disambiguator, object_name, sanitize_file_name, RemoteNamespace, ATTACHMENTS_ROOT,
};
pub use pipeline::AttachmentPipeline;
pub use remote::{AccessUrl, InjectedFault, MemoryObjectStore, ObjectStore, StoredObject};
pub use report::{BatchProgress, BatchReport, BatchStatus, FileFailure, ProgressCallback};
