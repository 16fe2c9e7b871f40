//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. Writes go through
//! [`Database::begin`], which groups them into short-lived transactions (see
//! [`crate::batch`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use directories::ProjectDirs;
use replica_shared::constants::{APP_NAME, COMMIT_WINDOW_MS, DATABASE_FILE_NAME};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::batch::WriteBatch;
use crate::encryptor::{MessageEncryptor, PlainEncryptor};
use crate::error::{Result, StoreError};
use crate::migrations;

/// Tunables for an opened store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Idle time after the last write before the open batch is committed.
    pub commit_window: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            commit_window: Duration::from_millis(COMMIT_WINDOW_MS),
        }
    }
}

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    batch: WriteBatch,
    encryptor: Arc<dyn MessageEncryptor>,
    /// Mirror of the `general` table, loaded at open.
    pub(crate) general: HashMap<String, String>,
    version: u32,
}

impl Database {
    /// Platform data directory path of the default database file.
    ///
    /// - Linux:   `~/.local/share/replica/replica.db`
    /// - macOS:   `~/Library/Application Support/com.replica.replica/replica.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\replica\replica\data\replica.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", APP_NAME, APP_NAME).ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join(DATABASE_FILE_NAME))
    }

    /// Open (or create) the default application database.
    pub fn new(options: StoreOptions) -> Result<Self> {
        let db_path = Self::default_path()?;
        info!(path = %db_path.display(), "opening database");
        Self::open_at(&db_path, options)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// Parent directories are created as needed. Migrations run
    /// unconditionally; only a failure to open the file or to read the
    /// schema version is returned.
    pub fn open_at(path: &Path, options: StoreOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::from_connection(conn, options)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory(options: StoreOptions) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, options)
    }

    fn from_connection(conn: Connection, options: StoreOptions) -> Result<Self> {
        let version = migrations::run_migrations(&conn)?;

        let mut db = Self {
            conn,
            batch: WriteBatch::new(options.commit_window),
            encryptor: Arc::new(PlainEncryptor),
            general: HashMap::new(),
            version,
        };
        db.reload_general()?;
        Ok(db)
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Schema version reached when the database was opened.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_encryptor(&mut self, encryptor: Arc<dyn MessageEncryptor>) {
        self.encryptor = encryptor;
    }

    pub fn encryptor(&self) -> &dyn MessageEncryptor {
        self.encryptor.as_ref()
    }

    // -----------------------------------------------------------------------
    // Write batching
    // -----------------------------------------------------------------------

    /// Join the current write batch, opening a transaction if none is open.
    pub fn begin(&mut self) {
        if !self.batch.touch(Instant::now()) {
            return;
        }
        if let Err(e) = self.conn.execute_batch("BEGIN") {
            warn!(error = %e, "failed to open write batch");
            self.batch.close();
        }
    }

    /// Commit the open batch, if any.
    pub fn commit(&mut self) {
        if !self.batch.close() {
            return;
        }
        match self.conn.execute_batch("COMMIT") {
            Ok(()) => debug!("write batch committed"),
            Err(e) => {
                warn!(error = %e, "failed to commit write batch");
                if !self.conn.is_autocommit() {
                    let _ = self.conn.execute_batch("ROLLBACK");
                }
            }
        }
    }

    /// Commit when the batch deadline has passed. Returns `true` if it did.
    pub fn commit_if_due(&mut self, now: Instant) -> bool {
        if self.batch.is_due(now) {
            self.commit();
            true
        } else {
            false
        }
    }

    pub fn commit_deadline(&self) -> Option<Instant> {
        self.batch.deadline()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.batch.is_open()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.commit();
    }
}
