//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::info;

use crewdesk_core::error::CrewError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// Uses WAL mode so other processes can read while this one writes. The
/// connection is wrapped in a Mutex since rusqlite Connection is not Sync.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, a busy timeout
    /// for writers in other processes, and runs all pending migrations.
    pub fn new(path: &Path) -> Result<Self, CrewError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| CrewError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| CrewError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, CrewError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CrewError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| CrewError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CrewError>
    where
        F: FnOnce(&Connection) -> Result<T, CrewError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CrewError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside an `IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so the closure's reads and writes
    /// are serialized against every other writer of the same database file.
    /// The transaction commits when the closure returns `Ok` and rolls back
    /// otherwise.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, CrewError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, CrewError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| CrewError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| CrewError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let value = f(&tx)?;
        tx.commit()
            .map_err(|e| CrewError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(value)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
