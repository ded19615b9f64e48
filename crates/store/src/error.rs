//! Error types for the history store

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the history store
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database corruption or schema mismatch
    #[error("Database error: {0}")]
    Database(String),

    /// Scope with a blank identifier
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Row rejected before insertion
    #[error("Invalid record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },

    #[error("Connection error: {0}")]
    ConnectionError(#[from] tokio_rusqlite::Error),
}

impl Error {
    /// Create a database error with a message
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRecord { index, reason: reason.into() }
    }
}

impl From<Error> for murmur_core::FetchError {
    fn from(err: Error) -> Self {
        murmur_core::FetchError::network(err.to_string())
    }
}
