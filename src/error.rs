//! Error types for the Ratekeeper service.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// Rate parameters failed validation
    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// A limiter with the same name already exists
    #[error("Limiter already exists: {0}")]
    Conflict(String),

    /// No limiter is registered under the given name or id
    #[error("Limiter not found: {0}")]
    NotFound(String),

    /// The limiter was shut down while the caller was talking to it
    #[error("Limiter unavailable: {0}")]
    Unavailable(String),

    /// Service configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Definition store errors
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;
