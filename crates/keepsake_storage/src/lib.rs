//! # Keepsake Storage
//!
//! Byte-level persistence for the Keepsake data layer.
//!
//! Two kinds of backend live here, and neither interprets what it stores:
//!
//! - [`LogBackend`]: an append-only byte log. The core writes its journal
//!   frames into it and replays the whole log on open.
//! - [`SlotBackend`]: a single durable value that is replaced wholesale.
//!   The session resolver keeps the current-user pointer in one, outside
//!   the record collections.
//!
//! ## Available Backends
//!
//! - [`InMemoryLog`] / [`InMemorySlot`] - For tests and ephemeral stores
//! - [`FileLog`] / [`FileSlot`] - Persistent, using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use keepsake_storage::{InMemoryLog, LogBackend};
//!
//! let mut log = InMemoryLog::new();
//! let offset = log.append(b"frame").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(log.load().unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod slot;

pub use backend::LogBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileLog;
pub use memory::InMemoryLog;
pub use slot::{FileSlot, InMemorySlot, SlotBackend};
