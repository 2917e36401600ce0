//! Error types for scribe.

use thiserror::Error;

use crate::digest::Digest;

/// Result type alias using scribe's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for scribe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found (store miss, recoverable)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Note not found
    #[error("Note not found: {0}")]
    NoteNotFound(uuid::Uuid),

    /// Content references a digest with no stored payload behind it.
    ///
    /// This is an integrity violation and is never masked.
    #[error("Missing payload for image reference: {0}")]
    MissingPayload(Digest),

    /// Stored payload exists but is not a valid embedded image
    #[error("Corrupt payload for image reference: {0}")]
    CorruptPayload(Digest),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a plain lookup miss that callers may treat as
    /// "not yet created".
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) | Error::NoteNotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
