//! # Keepsake Testkit
//!
//! Test utilities for Keepsake.
//!
//! This crate provides:
//! - Store fixtures over memory or temporary directories, reopenable to
//!   exercise recovery
//! - A manually driven clock for timestamp assertions
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use keepsake_testkit::prelude::*;
//!
//! let fixture = TestStore::memory();
//! let conn = fixture.connect_standard();
//! assert!(conn.is_open());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use clock::*;
pub use fixtures::*;
pub use generators::*;
