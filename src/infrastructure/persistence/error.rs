//! Storage errors

use crate::domain::shared::error::DomainError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage operation timed out: {0}")]
    Timeout(String),

    #[error("Storage throttled the request: {0}")]
    Throttled(String),

    #[error("Storage temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Storage configuration error: {0}")]
    Configuration(String),

    #[error("Entity codec error: {0}")]
    Codec(String),
}

impl StorageError {
    /// Faults worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Timeout(_) | StorageError::Throttled(_) | StorageError::Unavailable(_)
        )
    }
}

impl From<StorageError> for DomainError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            DomainError::StorageTransient(err.to_string())
        } else {
            DomainError::Storage(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::Timeout("t".into()).is_transient());
        assert!(StorageError::Throttled("t".into()).is_transient());
        assert!(!StorageError::BadRequest("b".into()).is_transient());
        assert!(!StorageError::NotFound("n".into()).is_transient());

        let domain: DomainError = StorageError::Unavailable("down".into()).into();
        assert!(domain.is_retryable());
        let domain: DomainError = StorageError::Codec("bad".into()).into();
        assert!(matches!(domain, DomainError::Storage(_)));
    }
}
