//! Request, response and decision models
//!
//! DTOs for the HTTP boundary plus the [`Decision`] returned by every check.

pub mod decision;
pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use decision::{Decision, DecisionSource};
pub use requests::{CheckQuery, InvalidateRequest};
pub use responses::{ErrorResponse, HealthResponse, InvalidateResponse};
