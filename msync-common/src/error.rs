//! Common error types for msync

use thiserror::Error;

/// Common result type for msync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across msync services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Message (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// CRM request failed or returned an unexpected status
    #[error("CRM error: {0}")]
    Crm(String),

    /// Message broker connection, publish or consume failure
    #[error("Broker error: {0}")]
    Broker(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Parking pass issuance would exceed the per-event limit
    #[error(transparent)]
    QuotaExceeded(#[from] crate::sync::QuotaExceeded),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Crm(err.to_string())
    }
}
