//! Shared error and result types for Keepsake

use thiserror::Error;

/// The primary error type for Keepsake operations
#[derive(Error, Debug)]
pub enum KeepsakeError {
    /// MongoDB or store-level failure
    #[error("database error: {0}")]
    Database(String),

    /// Content-generation provider failure
    #[error("provider error: {0}")]
    Provider(String),

    /// Payment processor failure (checkout creation, webhook parsing)
    #[error("payment error: {0}")]
    Payment(String),

    /// Email collaborator failure
    #[error("email error: {0}")]
    Email(String),

    /// Referenced entity does not exist
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    /// A state transition was rejected (status regression, sealed content, gated reveal)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration problem detected at startup or request time
    #[error("config error: {0}")]
    Config(String),

    /// HTTP transport failure
    #[error("http error: {0}")]
    Http(String),
}

impl From<std::io::Error> for KeepsakeError {
    fn from(e: std::io::Error) -> Self {
        KeepsakeError::Http(e.to_string())
    }
}

impl From<mongodb::error::Error> for KeepsakeError {
    fn from(e: mongodb::error::Error) -> Self {
        KeepsakeError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for KeepsakeError {
    fn from(e: reqwest::Error) -> Self {
        KeepsakeError::Http(e.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, KeepsakeError>;
