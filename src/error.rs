//! Error types for the permission cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Error type for cache operations and the HTTP boundary.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cache is full of entries exempt from eviction
    #[error("Cache full: {0}")]
    CacheFull(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CacheError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            CacheError::CacheFull(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

// == Storage Error ==
/// Failures reported by a durable key-value store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// The store refused the write because it is out of space
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Stored data could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Underlying I/O failure
    #[error("storage I/O failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

// == Origin Error ==
/// Failures reported by the origin permission service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OriginError {
    /// The service could not be reached
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete within its deadline
    #[error("origin call timed out")]
    Timeout,

    /// The service answered with a non-success status
    #[error("origin returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The service explicitly refused to evaluate the request
    #[error("permission denied: {0}")]
    Denied(String),

    /// Anything that does not fit the kinds above
    #[error("origin failure: {0}")]
    Other(String),
}

// == Transport Error ==
/// Failures on the live sync channel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_full_maps_to_503() {
        let response = CacheError::CacheFull("all entries pinned".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_invalid_request_maps_to_400() {
        let response = CacheError::InvalidRequest("missing actor".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_storage_error_from_io() {
        let err: StorageError =
            std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(matches!(err, StorageError::Io(msg) if msg.contains("disk gone")));
    }
}
