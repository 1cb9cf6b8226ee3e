// Database module for SQLite operations

use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{PrivacyError, Result};

pub mod migrations;

use migrations::run_migrations;

/// Shared handle to the local SQLite database.
///
/// A single connection behind a mutex: the vault's get-or-create path needs
/// a serialized critical section anyway, and the mutex provides it.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        run_migrations(&conn)?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get_connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Lock the connection, mapping a poisoned mutex to a storage error.
    pub fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PrivacyError::StorageUnavailable(format!("database lock error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_creation() {
        let dir = tempfile::tempdir().unwrap();
        let _db = Database::new(dir.path().join("test.db")).unwrap();
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::open_in_memory().unwrap();
        let guard = db.lock().unwrap();
        let count: i64 = guard
            .query_row("SELECT COUNT(*) FROM pseudonyms", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
