//! Jittered exponential backoff shared by reconnects and origin retries.

use std::time::Duration;

use rand::Rng;

/// `delay(n) = min(base * multiplier^n, max) + jitter`, jitter uniform in `[0, jitter]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: Duration,
}

impl BackoffConfig {
    /// Delay before attempt `attempt` (zero-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let max_ms = self.max.as_millis() as f64;
        let scaled = base_ms * self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        Duration::from_millis(scaled.min(max_ms) as u64)
    }

    /// Delay before attempt `attempt` (zero-based), with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}
