//! Persistence error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the database directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored row could not be turned back into a record.
    #[error("Invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// The blocking task running the query panicked or was cancelled.
    #[error("Database task failed: {0}")]
    Task(String),
}

/// Errors from object storage.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Storage is not usable with the given settings.
    #[error("Object storage is not configured: {0}")]
    Config(String),

    /// The object could not be written.
    #[error("Upload of '{key}' failed: {reason}")]
    Upload { key: String, reason: String },

    /// A retrieval URL could not be signed.
    #[error("Could not sign URL for '{key}': {reason}")]
    Presign { key: String, reason: String },
}
