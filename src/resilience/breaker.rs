//! Circuit breaker
//!
//! Pure state machine driven by the caller's clock readings, so transitions
//! are deterministic under a manual clock.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::ResilienceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Calls pass through
    Closed,
    /// Calls fail fast
    Open,
    /// One probing call decides the next state
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold
    pub failure_window: Duration,
    pub reset_timeout: Duration,
}

impl From<&ResilienceConfig> for CircuitBreakerConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            failure_window: config.failure_window,
            reset_timeout: config.reset_timeout,
        }
    }
}

/// Point-in-time view for stats and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<u64>,
}

// == Circuit Breaker ==
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_at: self.last_failure_at,
        }
    }

    /// Decides whether a call may go out at `now`. An open breaker whose
    /// reset timeout has been exceeded moves to half-open and admits the call.
    pub fn admit(&mut self, now: u64) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let reset_ms = self.config.reset_timeout.as_millis() as u64;
                let elapsed = now.saturating_sub(self.last_failure_at.unwrap_or(0));
                if elapsed > reset_ms {
                    self.state = BreakerState::HalfOpen;
                    self.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a successful call. Returns true when this closed a half-open breaker.
    pub fn record_success(&mut self) -> bool {
        self.failure_count = 0;
        self.success_count += 1;
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Closed;
            return true;
        }
        false
    }

    /// Records a failed call. Returns true when this opened the breaker.
    pub fn record_failure(&mut self, now: u64) -> bool {
        self.success_count = 0;
        let window_ms = self.config.failure_window.as_millis() as u64;
        if let Some(last) = self.last_failure_at {
            if now.saturating_sub(last) > window_ms {
                self.failure_count = 0;
            }
        }
        self.failure_count += 1;
        self.last_failure_at = Some(now);

        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                true
            }
            BreakerState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.state = BreakerState::Open;
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.last_failure_at = None;
    }
}
