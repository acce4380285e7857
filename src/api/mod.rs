//! API Module
//!
//! HTTP handlers and routing for the permission REST API.
//!
//! # Endpoints
//! - `GET /check` - Resolve a permission check
//! - `POST /invalidate` - Invalidate cached decisions
//! - `GET /stats` - Cache and resilience statistics
//! - `GET /errors` - Recent origin failures
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
