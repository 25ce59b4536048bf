//! SQLite-backed resolution store.
//!
//! [`Database`] keeps proposed resolutions, per-PR command watermarks and
//! the audit log. The store operations live in [`queries`]; migrations in
//! [`schema`].

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

pub use queries::AuditLogEntry;

/// File name of the state database inside the data directory.
pub const DB_FILE_NAME: &str = "conflictbot.db";

/// Handle to the state database.
///
/// One connection behind a `Mutex`, so the handle can be shared through
/// `Arc<dyn ResolutionStore>` across tasks.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file at `path`. Missing parent
    /// directories are created. Call [`initialize`](Self::initialize)
    /// before use.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!(path = %path.display(), "database opened in WAL mode");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open `conflictbot.db` under `data_dir` and bring its schema up to
    /// date.
    pub fn open_in<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        let path = data_dir.as_ref().join(DB_FILE_NAME);
        let db = Self::new(&path)?;
        db.initialize()?;
        info!(path = %path.display(), version = db.schema_version()?, "state database ready");
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Apply pending migrations.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        schema::run_migrations(&self.conn())
    }

    /// Current `user_version` of the schema.
    pub fn schema_version(&self) -> Result<u32, DatabaseError> {
        schema::current_version(&self.conn())
    }

    /// Lock the connection, recovering it if a previous holder panicked.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
