//! Resilience Module
//!
//! Circuit breaking, error classification, fallback strategies and the
//! offline-mode retry queue around origin calls.

pub mod breaker;
mod coordinator;
pub mod retry;
pub mod strategy;

pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use coordinator::{ErrorRecord, ReplayReport, ResilienceCoordinator, ResilienceOutcome};
pub use retry::{RetryQueue, RetryTask};
pub use strategy::{select_strategy, ErrorKind, FallbackStrategy};

// == Resilience Events ==
#[derive(Debug, Clone, PartialEq)]
pub enum ResilienceEvent {
    CircuitBreakerOpened { failure_count: u32 },
    OfflineModeEnabled { reason: String },
    OfflineModeDisabled,
}
