use thiserror::Error;

/// Errors produced by the store layer.
///
/// These never leave the store worker; they are logged at the command
/// boundary. Only [`Database::open_at`](crate::Database::open_at) hands one
/// back to the caller.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory or spawning
    /// the worker thread).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be decoded.
    #[error("Corrupt value in column {column}: {reason}")]
    Corrupt { column: &'static str, reason: String },

    /// Migration bookkeeping failure (the version table itself).
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
