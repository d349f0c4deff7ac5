//! Error types for the quotad service.

use thiserror::Error;
use tonic::Status;

use crate::store::StoreError;

/// Main error type for quotad operations.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The referenced policy does not exist
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// A policy violates the limit/window/algorithm invariants
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// A check request is malformed (empty identifier, bad cost, ...)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The shared state store could not complete the operation
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("configuration error: {0}")]
    Config(String),

    /// gRPC transport errors
    #[error("gRPC error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for quotad operations.
pub type Result<T> = std::result::Result<T, QuotaError>;

impl From<QuotaError> for Status {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::PolicyNotFound(_) => Status::not_found(err.to_string()),
            QuotaError::InvalidPolicy(_) | QuotaError::InvalidRequest(_) => {
                Status::invalid_argument(err.to_string())
            }
            // A store outage is a server-side failure, never a deny.
            QuotaError::Store(_) => Status::unavailable(err.to_string()),
            QuotaError::Config(_) | QuotaError::Transport(_) | QuotaError::Io(_) => {
                Status::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = Status::from(QuotaError::PolicyNotFound("abc".to_string()));
        assert_eq!(status.code(), tonic::Code::NotFound);
        assert!(status.message().contains("abc"));

        let status = Status::from(QuotaError::InvalidPolicy("limit must be greater than 0".into()));
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = Status::from(QuotaError::InvalidRequest("identifier is required".into()));
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = Status::from(QuotaError::Store(StoreError::Timeout(250)));
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
