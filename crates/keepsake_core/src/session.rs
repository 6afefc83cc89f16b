//! Current-user resolution.
//!
//! The pointer to the acting user lives in a durable slot outside the
//! record collections, so reading it never depends on a connection being
//! open. Resolving it to a [`User`] does.

use crate::catalog::USERS;
use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use crate::store::Store;
use crate::types::{Clock, Timestamp};
use crate::users::{User, UserDirectory};
use keepsake_storage::{InMemorySlot, SlotBackend};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPointer {
    user_id: String,
    #[serde(default)]
    set_at: Option<Timestamp>,
}

/// Resolves who is acting now.
#[derive(Clone)]
pub struct SessionResolver {
    slot: Arc<dyn SlotBackend>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionResolver {
    /// Creates a resolver over `slot`.
    #[must_use]
    pub fn new(slot: Arc<dyn SlotBackend>) -> Self {
        Self { slot, clock: None }
    }

    /// Creates a resolver over the store's session slot.
    #[must_use]
    pub fn for_store(store: &Store) -> Self {
        Self {
            slot: store.session_slot(),
            clock: Some(store.clock()),
        }
    }

    /// Creates a resolver with a throwaway in-memory slot.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemorySlot::new()))
    }

    /// Returns the stored pointer, without checking it.
    ///
    /// An unreadable pointer is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be read.
    pub fn current_user_id(&self) -> CoreResult<Option<String>> {
        let Some(bytes) = self.slot.read()? else {
            return Ok(None);
        };
        match serde_json::from_slice::<SessionPointer>(&bytes) {
            Ok(pointer) => Ok(Some(pointer.user_id)),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable session pointer");
                Ok(None)
            }
        }
    }

    /// Points the session at `user_id`. The id is not checked.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be written.
    pub fn set_current_user(&self, user_id: &str) -> CoreResult<()> {
        if user_id.is_empty() {
            return Err(CoreError::validation("session user id must not be empty"));
        }
        let pointer = SessionPointer {
            user_id: user_id.to_string(),
            set_at: self.clock.as_ref().map(|c| c.now_millis()),
        };
        self.slot.write(&serde_json::to_vec(&pointer)?)?;
        debug!(user = user_id, "session pointer set");
        Ok(())
    }

    /// Removes the pointer. Clearing twice is fine.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot cannot be cleared.
    pub fn clear_current_user(&self) -> CoreResult<()> {
        self.slot.clear()?;
        Ok(())
    }

    /// Resolves the acting user.
    ///
    /// Follows the pointer when it names an active user. Otherwise falls
    /// back to [`SessionResolver::default_user`].
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn current_user(&self, conn: &Connection) -> CoreResult<Option<User>> {
        if !conn.schema()?.has_collection(USERS) {
            return Ok(None);
        }
        if let Some(id) = self.current_user_id()? {
            match UserDirectory::new(conn).get(&id)? {
                Some(user) if !user.del_flag => return Ok(Some(user)),
                Some(_) => warn!(user = %id, "session points at a deleted user"),
                None => warn!(user = %id, "session points at a missing user"),
            }
        }
        self.default_user(conn)
    }

    /// The user acting when no valid pointer exists: the default user,
    /// else the oldest active one.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open.
    pub fn default_user(&self, conn: &Connection) -> CoreResult<Option<User>> {
        if !conn.schema()?.has_collection(USERS) {
            return Ok(None);
        }
        UserDirectory::new(conn).default_user()
    }
}

impl fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionResolver").finish_non_exhaustive()
    }
}
