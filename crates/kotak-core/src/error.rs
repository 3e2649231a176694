//! Error types for the core module

use kotak_api::ApiError;
use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// Request failed or returned a non-success status
    #[error("Network error: {0}")]
    Network(String),

    /// Account or message no longer exists on the mailbox service
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local storage error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Action needs an active session
    #[error("No active session")]
    NoSession,

    /// An address is already being generated
    #[error("Address generation already in progress")]
    GenerationInProgress,

    /// The session changed before the request completed
    #[error("Session changed while the request was in flight")]
    SessionChanged,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The session controller has stopped
    #[error("Session controller has shut down")]
    Shutdown,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Transient failures that leave the previous good state in place
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Network(_)
                | CoreError::GenerationInProgress
                | CoreError::SessionChanged
        )
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::DatabaseError(e.to_string())
    }
}

impl From<ApiError> for CoreError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NotFound(what) => CoreError::NotFound(what),
            other => CoreError::Network(other.to_string()),
        }
    }
}
