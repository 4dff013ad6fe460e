//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    quota_bytes: Option<u64>,
}

impl Database {
    /// Open (or create) the default cache database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/classpet/classpet.db`
    /// - macOS:   `~/Library/Application Support/com.classpet.classpet/classpet.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\classpet\classpet\data\classpet.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "classpet", "classpet").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("classpet.db");

        tracing::info!(path = %db_path.display(), "opening cache database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::from_connection(conn)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            quota_bytes: None,
        })
    }

    /// Cap the total size of stored values.  `0` removes the cap.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.set_quota(quota_bytes);
        self
    }

    pub fn set_quota(&mut self, quota_bytes: u64) {
        self.quota_bytes = (quota_bytes > 0).then_some(quota_bytes);
    }

    pub fn quota(&self) -> Option<u64> {
        self.quota_bytes
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        assert!(path.exists());
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = Database::open_at(&path).unwrap();
            db.set_json("k", &vec![1, 2, 3]).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        let value: Option<Vec<i32>> = db.get_json("k").unwrap();
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[test]
    fn zero_quota_means_unlimited() {
        let db = Database::open_in_memory().unwrap().with_quota(0);
        assert_eq!(db.quota(), None);
    }
}
