//! User profiles and the operations that manage them.
//!
//! A user is a record in the `users` collection whose owner is itself.
//! Removing a user cascades over every record it owns in every other
//! collection.

use crate::catalog::{DEFAULT_USER_INDEX, USERS};
use crate::collection::{ListOptions, RecordStore};
use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexKey;
use crate::record::{generate_id, NewRecord, Payload, Record};
use crate::session::SessionResolver;
use crate::types::Timestamp;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// A user profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User id, also its owner id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Reference to an avatar image.
    pub avatar_ref: Option<String>,
    /// Advisory activity flag.
    pub is_active: bool,
    /// Whether this is the installation's default user.
    pub is_default: bool,
    /// Creation time.
    pub created_at: Option<Timestamp>,
    /// Last update time.
    pub updated_at: Option<Timestamp>,
    /// Soft-delete marker.
    pub del_flag: bool,
}

impl User {
    /// Reads a user from its record.
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        let text = |key: &str| record.payload.get(key).and_then(Value::as_str);
        let flag = |key: &str| record.payload.get(key).and_then(Value::as_bool);
        Self {
            id: record.id.clone(),
            name: text("name").unwrap_or_default().to_string(),
            avatar_ref: text("avatarRef").map(str::to_string),
            is_active: flag("isActive").unwrap_or(true),
            is_default: flag("isDefault").unwrap_or(false),
            created_at: record.created_at,
            updated_at: record.updated_at,
            del_flag: record.del_flag,
        }
    }
}

/// Fields for a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Display name.
    pub name: String,
    /// Avatar reference.
    pub avatar_ref: Option<String>,
    /// Mark as the default user.
    pub is_default: bool,
}

impl NewUser {
    /// A non-default user named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avatar_ref: None,
            is_default: false,
        }
    }

    /// Marks the user as the default.
    #[must_use]
    pub fn default_user(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Sets the avatar reference.
    #[must_use]
    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }
}

/// A partial profile edit. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New avatar reference; `Some(None)` removes it.
    pub avatar_ref: Option<Option<String>>,
    /// New activity flag.
    pub is_active: Option<bool>,
}

impl ProfileUpdate {
    fn into_patch(self) -> CoreResult<Payload> {
        let mut patch = Payload::new();
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(CoreError::validation("user name must not be empty"));
            }
            patch.insert("name".into(), Value::String(name));
        }
        if let Some(avatar) = self.avatar_ref {
            patch.insert("avatarRef".into(), avatar.map_or(Value::Null, Value::String));
        }
        if let Some(active) = self.is_active {
            patch.insert("isActive".into(), Value::Bool(active));
        }
        Ok(patch)
    }
}

/// How [`UserDirectory::remove_user`] treats owned records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeMode {
    /// Soft-delete the user and everything it owns.
    Soft,
    /// Physically remove the user and everything it owns.
    Hard,
}

/// What a removal touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    /// The removed user.
    pub user_id: String,
    /// The cascade mode used.
    pub mode: CascadeMode,
    /// Records changed per collection, excluding the user record itself.
    pub affected: BTreeMap<String, usize>,
    /// Whether the session pointer referenced the user and was cleared.
    pub cleared_session: bool,
}

/// User operations over an open connection.
#[derive(Debug)]
pub struct UserDirectory<'c> {
    conn: &'c Connection,
}

impl<'c> UserDirectory<'c> {
    /// Creates a directory over `conn`.
    #[must_use]
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn users(&self) -> CoreResult<RecordStore<'c>> {
        self.conn.collection(USERS)
    }

    /// Creates a user. Its owner id is its own id.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` for an empty name, or `Conflict` if a
    /// default user is requested while another one exists.
    pub fn create_user(&self, new: NewUser) -> CoreResult<User> {
        if new.name.trim().is_empty() {
            return Err(CoreError::validation("user name must not be empty"));
        }
        if new.is_default {
            if let Some(existing) = self.default_user()? {
                if existing.is_default {
                    return Err(CoreError::conflict(USERS, existing.id));
                }
            }
        }

        let id = generate_id(self.conn.store().now());
        let mut record = NewRecord::new(id.clone())
            .with_id(id)
            .with_field("name", new.name)
            .with_field("isActive", true)
            .with_field("isDefault", new.is_default);
        if let Some(avatar) = new.avatar_ref {
            record = record.with_field("avatarRef", avatar);
        }
        let users = self.users()?;
        let id = users.add(record)?;
        self.require(&users, &id)
    }

    /// Creates a default user named `name` if the users collection holds
    /// no records at all, deleted ones included.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the users collection does not exist.
    pub fn seed_default_user(&self, name: &str) -> CoreResult<Option<User>> {
        if self.users()?.count(ListOptions::include_deleted())? > 0 {
            return Ok(None);
        }
        let user = self.create_user(NewUser::new(name).default_user())?;
        info!(user = %user.id, "seeded default user");
        Ok(Some(user))
    }

    /// Returns a user by id, soft-deleted or not.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the users collection does not exist.
    pub fn get(&self, id: &str) -> CoreResult<Option<User>> {
        Ok(self.users()?.get(id)?.as_ref().map(User::from_record))
    }

    /// Returns active users, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the users collection does not exist.
    pub fn list_users(&self) -> CoreResult<Vec<User>> {
        let mut users: Vec<User> = self
            .users()?
            .list_all(ListOptions::active())?
            .iter()
            .map(User::from_record)
            .collect();
        users.sort_by(|a, b| {
            a.created_at
                .unwrap_or(u64::MAX)
                .cmp(&b.created_at.unwrap_or(u64::MAX))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(users)
    }

    /// Returns the active default user, or failing that the oldest active
    /// user.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the users collection does not exist.
    pub fn default_user(&self) -> CoreResult<Option<User>> {
        let users = self.users()?;
        let flagged = match users.find_by_index(
            DEFAULT_USER_INDEX,
            &IndexKey::Bool(true),
            ListOptions::active(),
        ) {
            Ok(records) => records.first().map(User::from_record),
            Err(CoreError::InvalidOperation { .. }) => self
                .list_users()?
                .into_iter()
                .find(|u| u.is_default),
            Err(e) => return Err(e),
        };
        match flagged {
            Some(user) => Ok(Some(user)),
            None => Ok(self.list_users()?.into_iter().next()),
        }
    }

    /// Applies a profile edit.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id or `ValidationFailed` for an
    /// empty name.
    pub fn update_profile(&self, id: &str, update: ProfileUpdate) -> CoreResult<User> {
        let patch = update.into_patch()?;
        let record = self.users()?.update(id, &patch)?;
        Ok(User::from_record(&record))
    }

    /// Makes `id` the default user and clears the flag everywhere else.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist or is deleted.
    pub fn make_default(&self, id: &str) -> CoreResult<User> {
        let users = self.users()?;
        match users.get(id)? {
            Some(record) if record.is_active() => {}
            _ => return Err(CoreError::not_found(USERS, id)),
        }
        let mut clear = Payload::new();
        clear.insert("isDefault".into(), Value::Bool(false));
        for other in self.list_users()? {
            if other.is_default && other.id != id {
                users.update(&other.id, &clear)?;
            }
        }
        let mut set = Payload::new();
        set.insert("isDefault".into(), Value::Bool(true));
        Ok(User::from_record(&users.update(id, &set)?))
    }

    /// Removes a user and cascades over every record it owns.
    ///
    /// The session pointer is cleared when it referenced the user.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist.
    pub fn remove_user(
        &self,
        id: &str,
        mode: CascadeMode,
        session: Option<&SessionResolver>,
    ) -> CoreResult<RemovalReport> {
        let users = self.users()?;
        if users.get(id)?.is_none() {
            return Err(CoreError::not_found(USERS, id));
        }

        let mut affected = BTreeMap::new();
        for name in self.conn.schema()?.collection_names() {
            if name == USERS {
                continue;
            }
            let collection = self.conn.collection(&name)?;
            let mut changed = 0;
            for record in collection.list_by_owner_with(id, ListOptions::include_deleted())? {
                let touched = match mode {
                    CascadeMode::Soft => collection.soft_delete(&record.id)?,
                    CascadeMode::Hard => collection.hard_delete(&record.id)?,
                };
                if touched {
                    changed += 1;
                }
            }
            if changed > 0 {
                affected.insert(name, changed);
            }
        }

        match mode {
            CascadeMode::Soft => {
                users.soft_delete(id)?;
            }
            CascadeMode::Hard => {
                users.hard_delete(id)?;
            }
        }

        let mut cleared_session = false;
        if let Some(session) = session {
            if session.current_user_id()?.as_deref() == Some(id) {
                session.clear_current_user()?;
                cleared_session = true;
            }
        }

        info!(user = id, mode = ?mode, collections = affected.len(), "user removed");
        Ok(RemovalReport {
            user_id: id.to_string(),
            mode,
            affected,
            cleared_session,
        })
    }

    fn require(&self, users: &RecordStore<'_>, id: &str) -> CoreResult<User> {
        users
            .get(id)?
            .as_ref()
            .map(User::from_record)
            .ok_or_else(|| CoreError::not_found(USERS, id))
    }
}
