//! The object store capability and an in-memory implementation.

use crate::error::{SyncError, SyncResult};
use crate::naming::RemoteNamespace;
use bytes::Bytes;
use keepsake_core::{Clock, SystemClock, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A short-lived URL for reading one object.
///
/// Never persisted; ask for a fresh one each time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUrl {
    /// The URL.
    pub url: String,
    /// When the URL stops working, in milliseconds since the epoch.
    pub expires_at: Timestamp,
}

impl AccessUrl {
    /// Returns true once `now` has reached the expiry.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Remote binary storage keyed by remote name.
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` as `object_name` inside `namespace` and returns the
    /// full remote name.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` or `Remote`.
    fn put(
        &self,
        namespace: &RemoteNamespace,
        object_name: &str,
        mime_type: &str,
        bytes: Bytes,
    ) -> SyncResult<String>;

    /// Deletes an object. Deleting a missing object succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` or `Remote`.
    fn delete(&self, remote_name: &str) -> SyncResult<()>;

    /// Issues a URL valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` or `Remote`.
    fn temporary_url(&self, remote_name: &str, ttl: Duration) -> SyncResult<AccessUrl>;

    /// Lists the remote names in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` unless the store implements listing.
    fn list(&self, namespace: &RemoteNamespace) -> SyncResult<Vec<String>> {
        let _ = namespace;
        Err(SyncError::Unsupported("list"))
    }
}

/// A fault the memory store injects into one `put` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// A retryable remote error.
    Remote,
    /// The session expired.
    Unauthenticated,
}

/// An object kept by [`MemoryObjectStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object contents.
    pub bytes: Bytes,
    /// MIME type given at upload.
    pub mime_type: String,
}

/// An object store in memory, for tests and offline use.
///
/// Counts every call and can fail chosen `put` calls.
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    faults: Mutex<HashMap<usize, InjectedFault>>,
    clock: Arc<dyn Clock>,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    urls: AtomicUsize,
    lists: AtomicUsize,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store stamping URL expiry with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(HashMap::new()),
            clock,
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            urls: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }

    /// Makes the `call`-th `put` (counting from 1) fail with `fault`.
    pub fn fail_put(&self, call: usize, fault: InjectedFault) {
        self.faults.lock().insert(call, fault);
    }

    /// Returns the object stored under `remote_name`.
    pub fn object(&self, remote_name: &str) -> Option<StoredObject> {
        self.objects.read().get(remote_name).cloned()
    }

    /// Returns true if `remote_name` is stored.
    pub fn contains(&self, remote_name: &str) -> bool {
        self.objects.read().contains_key(remote_name)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Number of `put` calls, failed ones included.
    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Total calls of every kind.
    pub fn network_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
            + self.deletes.load(Ordering::SeqCst)
            + self.urls.load(Ordering::SeqCst)
            + self.lists.load(Ordering::SeqCst)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryObjectStore")
            .field("objects", &self.len())
            .field("calls", &self.network_calls())
            .finish()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(
        &self,
        namespace: &RemoteNamespace,
        object_name: &str,
        mime_type: &str,
        bytes: Bytes,
    ) -> SyncResult<String> {
        let call = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.faults.lock().remove(&call) {
            Some(InjectedFault::Remote) => {
                return Err(SyncError::remote_retryable(format!(
                    "injected failure on put #{call}"
                )))
            }
            Some(InjectedFault::Unauthenticated) => {
                return Err(SyncError::Unauthenticated("session expired".into()))
            }
            None => {}
        }

        let remote_name = namespace.remote_name(object_name);
        self.objects.write().insert(
            remote_name.clone(),
            StoredObject {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        Ok(remote_name)
    }

    fn delete(&self, remote_name: &str) -> SyncResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.objects.write().remove(remote_name);
        Ok(())
    }

    fn temporary_url(&self, remote_name: &str, ttl: Duration) -> SyncResult<AccessUrl> {
        self.urls.fetch_add(1, Ordering::SeqCst);
        if !self.contains(remote_name) {
            return Err(SyncError::remote_fatal(format!("no object named {remote_name}")));
        }
        let ttl = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_millis().saturating_add(ttl);
        Ok(AccessUrl {
            url: format!("memory://{remote_name}?expires={expires_at}"),
            expires_at,
        })
    }

    fn list(&self, namespace: &RemoteNamespace) -> SyncResult<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let prefix = namespace.prefix();
        Ok(self
            .objects
            .read()
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
