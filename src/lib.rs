//! permcache - resilient client-side RBAC permission resolution
//!
//! Answers "can this actor do this action on this resource" from a two-tier
//! cache, keeps the cache fresh over a live sync channel, and keeps answering
//! through origin outages with a circuit breaker, fallback strategies and an
//! offline mode.

pub mod adapters;
pub mod api;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod ports;
pub mod resilience;
pub mod resolver;
pub mod sync;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheManager, Invalidation};
pub use config::Config;
pub use models::{Decision, DecisionSource};
pub use ports::CheckRequest;
pub use resolver::{PermissionResolver, ResolverPorts, ResolverStats};
