//! Acting-user commands.

use super::{connect, connect_read_only, emit, has_users, open_existing, UserRow};
use crate::OutputFormat;
use keepsake_core::{Connection, SessionResolver, Store, UserDirectory};
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use tracing::info;

/// Who the store acts as.
#[derive(Debug, Serialize)]
pub struct WhoamiResult {
    /// The resolved acting user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRow>,
    /// Whether the user came from the default fallback rather than the
    /// stored pointer.
    pub fallback: bool,
}

/// Resolves the acting user.
pub fn resolve(store: &Store, conn: &Connection) -> Result<WhoamiResult, Box<dyn Error>> {
    if !has_users(conn)? {
        return Ok(WhoamiResult {
            user: None,
            fallback: false,
        });
    }
    let session = SessionResolver::for_store(store);
    let pointer = session.current_user_id()?;
    let user = session.current_user(conn)?;
    let fallback = match (&user, pointer.as_deref()) {
        (Some(user), Some(id)) => user.id != id,
        (Some(_), None) => true,
        (None, _) => false,
    };
    Ok(WhoamiResult {
        user: user.as_ref().map(UserRow::from),
        fallback,
    })
}

/// Points the session at an active user.
pub fn switch(store: &Store, conn: &Connection, id: &str) -> Result<UserRow, Box<dyn Error>> {
    let user = match UserDirectory::new(conn).get(id)? {
        Some(user) if !user.del_flag => user,
        _ => return Err(format!("No active user with id {id}").into()),
    };
    SessionResolver::for_store(store).set_current_user(&user.id)?;
    info!(user = %user.id, "acting user switched");
    Ok(UserRow::from(&user))
}

/// Runs `whoami`.
pub fn whoami(path: &Path, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let store = open_existing(path)?;
    let conn = connect_read_only(&store)?;
    let result = resolve(&store, &conn)?;
    emit(format, &result, |result| match &result.user {
        Some(user) if result.fallback => println!("{} (fallback)", user.line()),
        Some(user) => println!("{}", user.line()),
        None => println!("No users"),
    })
}

/// Runs `use-user`.
pub fn use_user(path: &Path, id: &str, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let store = open_existing(path)?;
    let conn = connect(&store)?;
    let row = switch(&store, &conn, id)?;
    emit(format, &row, |row| println!("Now acting as {}", row.line()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::NewUser;

    #[test]
    fn switching_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let ben_id = {
            let store = Store::open(dir.path()).unwrap();
            let conn = connect(&store).unwrap();
            let users = UserDirectory::new(&conn);
            users.seed_default_user("Me").unwrap();
            let ben = users.create_user(NewUser::new("Ben")).unwrap();

            let before = resolve(&store, &conn).unwrap();
            assert!(before.fallback);
            assert_eq!(before.user.unwrap().name, "Me");

            switch(&store, &conn, &ben.id).unwrap();
            ben.id
        };

        let store = Store::open(dir.path()).unwrap();
        let conn = connect(&store).unwrap();
        let after = resolve(&store, &conn).unwrap();
        assert!(!after.fallback);
        assert_eq!(after.user.unwrap().id, ben_id);
    }

    #[test]
    fn read_only_commands_keep_an_old_store_at_its_version() {
        let dir = tempfile::tempdir().unwrap();
        drop(Store::open(dir.path()).unwrap());

        whoami(dir.path(), OutputFormat::Json).unwrap();
        crate::commands::users::list(dir.path(), true, OutputFormat::Json).unwrap();
        crate::commands::inspect::run(dir.path(), OutputFormat::Json).unwrap();

        let store = Store::open(dir.path()).unwrap();
        assert_eq!(store.version(), keepsake_core::SchemaVersion::INITIAL);
        assert!(store.schema().collection_names().is_empty());
    }

    #[test]
    fn unknown_user_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let conn = connect(&store).unwrap();
        assert!(switch(&store, &conn, "nobody").is_err());
        assert!(resolve(&store, &conn).unwrap().user.is_none());
    }
}
