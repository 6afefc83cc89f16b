//! User profile commands.

use super::{connect, connect_read_only, emit, has_users, open_existing, UserRow};
use crate::OutputFormat;
use keepsake_core::{
    catalog, CascadeMode, Connection, ListOptions, NewUser, SessionResolver, Store, User,
    UserDirectory,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use tracing::info;

/// Result of a user removal.
#[derive(Debug, Serialize)]
pub struct RemoveResult {
    /// Removed user id.
    pub user_id: String,
    /// Whether records were deleted permanently.
    pub hard: bool,
    /// Records changed per collection.
    pub affected: BTreeMap<String, usize>,
    /// Whether the acting-user pointer was cleared.
    pub cleared_session: bool,
}

/// Lists users, oldest first. Removed users are included with `all`.
pub fn list_rows(conn: &Connection, all: bool) -> Result<Vec<UserRow>, Box<dyn Error>> {
    if !has_users(conn)? {
        return Ok(Vec::new());
    }
    let dir = UserDirectory::new(conn);
    if !all {
        return Ok(dir.list_users()?.iter().map(UserRow::from).collect());
    }
    let mut rows: Vec<UserRow> = conn
        .collection(catalog::USERS)?
        .list_all(ListOptions::include_deleted())?
        .iter()
        .map(User::from_record)
        .map(|user| UserRow::from(&user))
        .collect();
    rows.sort_by(|a, b| {
        a.created_at
            .unwrap_or(u64::MAX)
            .cmp(&b.created_at.unwrap_or(u64::MAX))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(rows)
}

/// Creates a user, optionally taking over the default flag.
pub fn add_user(conn: &Connection, name: &str, make_default: bool) -> Result<UserRow, Box<dyn Error>> {
    let dir = UserDirectory::new(conn);
    let mut user = dir.create_user(NewUser::new(name))?;
    if make_default {
        user = dir.make_default(&user.id)?;
    }
    info!(user = %user.id, default = user.is_default, "user added");
    Ok(UserRow::from(&user))
}

/// Removes a user and cascades over its records.
pub fn remove_user(store: &Store, conn: &Connection, id: &str, hard: bool) -> Result<RemoveResult, Box<dyn Error>> {
    let mode = if hard { CascadeMode::Hard } else { CascadeMode::Soft };
    let session = SessionResolver::for_store(store);
    let report = UserDirectory::new(conn).remove_user(id, mode, Some(&session))?;
    Ok(RemoveResult {
        user_id: report.user_id,
        hard,
        affected: report.affected,
        cleared_session: report.cleared_session,
    })
}

/// Runs `users list`.
pub fn list(path: &Path, all: bool, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let store = open_existing(path)?;
    let conn = connect_read_only(&store)?;
    let rows = list_rows(&conn, all)?;
    emit(format, &rows, |rows| {
        if rows.is_empty() {
            println!("No users");
        }
        for row in rows {
            println!("{}", row.line());
        }
    })
}

/// Runs `users add`.
pub fn add(path: &Path, name: &str, make_default: bool, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let store = open_existing(path)?;
    let conn = connect(&store)?;
    let row = add_user(&conn, name, make_default)?;
    emit(format, &row, |row| println!("Added {}", row.line()))
}

/// Runs `users remove`.
pub fn remove(path: &Path, id: &str, hard: bool, format: OutputFormat) -> Result<(), Box<dyn Error>> {
    let store = open_existing(path)?;
    let conn = connect(&store)?;
    let result = remove_user(&store, &conn, id, hard)?;
    emit(format, &result, |result| {
        println!(
            "Removed user {} ({})",
            result.user_id,
            if result.hard { "permanently" } else { "marked deleted" }
        );
        for (collection, count) in &result.affected {
            println!("  {collection}: {count} records");
        }
        if result.cleared_session {
            println!("  Acting user cleared");
        }
    })
}
