//! Response DTOs for the permission API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::resilience::BreakerState;
use crate::sync::ConnectionState;

/// Response body for `POST /invalidate`.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// In-memory entries removed
    pub removed: usize,
}

impl InvalidateResponse {
    pub fn new(removed: usize) -> Self {
        Self { removed }
    }
}

/// Response body for `GET /health`.
///
/// `status` is "healthy" while the origin path is fully available and
/// "degraded" in offline mode or with the breaker not closed.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    pub connection: ConnectionState,
    pub breaker_state: BreakerState,
    pub offline_mode: bool,
}

impl HealthResponse {
    pub fn new(connection: ConnectionState, breaker_state: BreakerState, offline_mode: bool) -> Self {
        let healthy = !offline_mode && breaker_state == BreakerState::Closed;
        Self {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            connection,
            breaker_state,
            offline_mode,
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
