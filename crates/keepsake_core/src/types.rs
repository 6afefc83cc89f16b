//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// The single monotonically increasing version governing structural
/// changes to a store.
///
/// A fresh store starts at [`SchemaVersion::INITIAL`]. The version only
/// ever moves forward, one committed upgrade at a time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SchemaVersion(pub u64);

impl SchemaVersion {
    /// The version of a store that has never been upgraded.
    pub const INITIAL: Self = Self(0);

    /// Creates a schema version.
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    /// Returns the raw version number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the version after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for SchemaVersion {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Source of wall-clock time for timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> Timestamp;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// A clock that advances one millisecond on every reading.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct TickClock(std::sync::atomic::AtomicU64);

#[cfg(test)]
impl Clock for TickClock {
    fn now_millis(&self) -> Timestamp {
        1_700_000_000_000 + self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}
