//! Error types for keyobject operations.

use common::KvError;

/// Error type for keyobject operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid input: malformed keys, unregistered types, or indexed field
    /// shapes no converter can handle.
    InvalidInput(String),

    /// The requested object does not exist, or an iterator is exhausted.
    NotFound,

    /// A type name or stringer registration collided with an existing one.
    AlreadyExists(String),

    /// Encoding or decoding errors, for payloads and stored envelopes alike.
    Encoding(String),

    /// Errors from the underlying key-value store, passed through unchanged.
    Storage(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::NotFound => write!(f, "Not found"),
            Error::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<KvError> for Error {
    fn from(err: KvError) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Result type alias for keyobject operations.
pub type Result<T> = std::result::Result<T, Error>;
