//! CLI command implementations.

pub mod compact;
pub mod init;
pub mod inspect;
pub mod session;
pub mod users;

use crate::OutputFormat;
use keepsake_core::{catalog, Connection, Store, StoreConfig, User};
use serde::Serialize;
use std::error::Error;
use std::path::Path;

/// Opens an existing store. Only `init` may create one.
pub(crate) fn open_existing(path: &Path) -> Result<Store, Box<dyn Error>> {
    if !path.exists() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(Store::open_with_config(
        path,
        StoreConfig::new().create_if_missing(false),
    )?)
}

/// Connects at the current version and creates any missing standard
/// collection. Used by commands that write.
pub(crate) fn connect(store: &Store) -> Result<Connection, Box<dyn Error>> {
    let conn = store.connect_current()?;
    catalog::standard_registry().ensure_declared(&conn)?;
    Ok(conn)
}

/// Connects at the current version without touching the schema.
pub(crate) fn connect_read_only(store: &Store) -> Result<Connection, Box<dyn Error>> {
    Ok(store.connect_current()?)
}

/// Returns true once the users collection exists.
pub(crate) fn has_users(conn: &Connection) -> Result<bool, Box<dyn Error>> {
    Ok(conn.schema()?.has_collection(catalog::USERS))
}

/// Prints `value` as pretty JSON, or through `text` otherwise.
pub(crate) fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T),
) -> Result<(), Box<dyn Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

/// A user as printed by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRow {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Default-user flag.
    pub is_default: bool,
    /// Whether the user has been removed.
    pub removed: bool,
    /// Creation time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

impl From<&User> for UserRow {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            is_default: user.is_default,
            removed: user.del_flag,
            created_at: user.created_at,
        }
    }
}

impl UserRow {
    pub(crate) fn line(&self) -> String {
        let mut line = format!("{}  {}", self.id, self.name);
        if self.is_default {
            line.push_str("  (default)");
        }
        if self.removed {
            line.push_str("  (removed)");
        }
        line
    }
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_pick_a_unit() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn missing_directory_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        assert!(open_existing(&path).is_err());
        assert!(!path.exists());
    }
}
