//! Error types for lounge.

use thiserror::Error;

use crate::file::TransferError;

/// Common error type for lounge.
#[derive(Error, Debug)]
pub enum LoungeError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or request from the peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Validation error for peer-supplied input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote side refused a request, with its reason.
    #[error("refused: {0}")]
    Refused(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// The peer link went away.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// File transfer failure.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LoungeError {
    /// Whether this error is a usage fault that is answered with a reason
    /// while the session keeps running.
    pub fn is_rejection(&self) -> bool {
        matches!(self, LoungeError::Protocol(_) | LoungeError::Validation(_))
    }
}

impl From<serde_json::Error> for LoungeError {
    fn from(e: serde_json::Error) -> Self {
        LoungeError::Protocol(e.to_string())
    }
}

/// Result type alias for lounge operations.
pub type Result<T> = std::result::Result<T, LoungeError>;
