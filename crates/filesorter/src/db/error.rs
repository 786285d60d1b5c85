//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from cache and taxonomy database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the config directory or database file.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A schema step failed to apply.
    #[error("Schema initialization failed: {0}")]
    Schema(String),

    /// The connection lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
