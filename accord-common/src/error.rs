//! Common error types for Accord

use thiserror::Error;

/// Common result type for Accord operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Accord crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A store (transactional or analytical) could not be reached or queried
    #[error("Store unavailable ({store}): {message}")]
    StoreUnavailable { store: String, message: String },

    /// Dual-write pipeline rejected or failed a write-back
    #[error("Dual-write error: {0}")]
    DualWrite(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `StoreUnavailable` error for the named store.
    pub fn store(store: impl Into<String>, message: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            store: store.into(),
            message: message.into(),
        }
    }
}
