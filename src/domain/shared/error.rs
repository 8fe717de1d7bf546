//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Lifecycle move not reachable from the current status
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Event for a call that already reached a terminal status
    #[error("Stale event: {0}")]
    StaleEvent(String),

    #[error("Stream conflict: {0}")]
    StreamConflict(String),

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Unknown call: {0}")]
    UnknownCall(String),

    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    #[error("Missing argument: {0}")]
    ArgumentNull(String),

    /// Storage kept failing with a retryable fault until the retry budget ran out
    #[error("Transient storage failure: {0}")]
    StorageTransient(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Signals that are logged and dropped instead of being reported as failures
    pub fn is_benign(&self) -> bool {
        matches!(self, DomainError::StaleEvent(_))
    }

    /// Whether another attempt at the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::StorageTransient(_))
    }
}
