use std::time::Duration;
use thiserror::Error;

/// Result type alias for murmur-core
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the conversation log engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error for file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Historical page retrieval errors
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Outgoing message validation errors
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Live session errors
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Failure while retrieving one page of history.
///
/// Recovered locally: the scroll-back controller returns to idle and the
/// next proximity signal (or an explicit reload) retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport or backend failure
    #[error("network error: {0}")]
    Network(String),

    /// A record in the page could not be decoded; the whole page is rejected
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The backend did not answer in time
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The fetch was cancelled because its conversation context was torn down
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Create a network error with a message
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Whether re-triggering the fetch may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Malformed historical record
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// `createdAt` is not an ISO 8601 timestamp
    #[error("record {index}: invalid timestamp '{value}'")]
    InvalidTimestamp { index: usize, value: String },

    /// Record is missing a required field or is otherwise unusable
    #[error("record {index}: {reason}")]
    Malformed { index: usize, reason: String },
}

/// Outgoing text rejected before it reaches the send pipeline
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Text is empty or whitespace only
    #[error("message is empty")]
    EmptyMessage,
}

/// Failure reported by the external live session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session is not connected
    #[error("live session is not connected")]
    Disconnected,

    /// The session refused or failed to deliver the text
    #[error("send failed: {0}")]
    SendFailed(String),
}
