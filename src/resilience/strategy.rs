//! Error classification and fallback strategy selection.

use std::fmt;

use serde::Serialize;

use crate::error::OriginError;
use crate::resilience::BreakerState;

// == Error Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NetworkError,
    TimeoutError,
    /// 401 / 403
    AuthError,
    /// 5xx
    ServerError,
    /// 429
    RateLimited,
    /// The origin refused to evaluate the check
    PermissionDenied,
    /// The breaker rejected the call before it went out
    CircuitOpen,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::NetworkError,
        ErrorKind::TimeoutError,
        ErrorKind::AuthError,
        ErrorKind::ServerError,
        ErrorKind::RateLimited,
        ErrorKind::PermissionDenied,
        ErrorKind::CircuitOpen,
        ErrorKind::Unknown,
    ];

    pub fn classify(error: &OriginError) -> Self {
        match error {
            OriginError::Network(_) => ErrorKind::NetworkError,
            OriginError::Timeout => ErrorKind::TimeoutError,
            OriginError::Denied(_) => ErrorKind::PermissionDenied,
            OriginError::Status { status, .. } => match status {
                401 | 403 => ErrorKind::AuthError,
                429 => ErrorKind::RateLimited,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::Unknown,
            },
            OriginError::Other(_) => ErrorKind::Unknown,
        }
    }

    /// Failures that say something about origin health.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::TimeoutError
                | ErrorKind::ServerError
                | ErrorKind::RateLimited
        )
    }

    /// Whether a failure of this kind counts toward opening the breaker.
    pub fn trips_breaker(&self) -> bool {
        self.is_transient() || *self == ErrorKind::Unknown
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// == Fallback Strategy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackStrategy {
    RetryWithBackoff,
    CacheFallback,
    OfflineMode,
    DefaultPermissions,
    GracefulDegradation,
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackStrategy::RetryWithBackoff => "RETRY_WITH_BACKOFF",
            FallbackStrategy::CacheFallback => "CACHE_FALLBACK",
            FallbackStrategy::OfflineMode => "OFFLINE_MODE",
            FallbackStrategy::DefaultPermissions => "DEFAULT_PERMISSIONS",
            FallbackStrategy::GracefulDegradation => "GRACEFUL_DEGRADATION",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the fallback for a failed check. An open breaker always wins.
pub fn select_strategy(kind: ErrorKind, breaker: BreakerState, online: bool) -> FallbackStrategy {
    if breaker == BreakerState::Open {
        return FallbackStrategy::OfflineMode;
    }
    match kind {
        ErrorKind::NetworkError if online => FallbackStrategy::RetryWithBackoff,
        ErrorKind::NetworkError => FallbackStrategy::OfflineMode,
        ErrorKind::TimeoutError | ErrorKind::RateLimited => FallbackStrategy::CacheFallback,
        ErrorKind::AuthError => FallbackStrategy::DefaultPermissions,
        ErrorKind::ServerError => FallbackStrategy::RetryWithBackoff,
        ErrorKind::PermissionDenied => FallbackStrategy::GracefulDegradation,
        ErrorKind::CircuitOpen => FallbackStrategy::OfflineMode,
        ErrorKind::Unknown => FallbackStrategy::CacheFallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status_codes() {
        let status = |code| OriginError::Status {
            status: code,
            message: String::new(),
        };
        assert_eq!(ErrorKind::classify(&status(401)), ErrorKind::AuthError);
        assert_eq!(ErrorKind::classify(&status(403)), ErrorKind::AuthError);
        assert_eq!(ErrorKind::classify(&status(429)), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::classify(&status(503)), ErrorKind::ServerError);
        assert_eq!(ErrorKind::classify(&status(404)), ErrorKind::Unknown);
        assert_eq!(ErrorKind::classify(&OriginError::Timeout), ErrorKind::TimeoutError);
        assert_eq!(
            ErrorKind::classify(&OriginError::Denied("no".into())),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_strategy_table() {
        use BreakerState::*;
        use FallbackStrategy::*;

        assert_eq!(select_strategy(ErrorKind::NetworkError, Closed, true), RetryWithBackoff);
        assert_eq!(select_strategy(ErrorKind::NetworkError, Closed, false), OfflineMode);
        assert_eq!(select_strategy(ErrorKind::TimeoutError, Closed, true), CacheFallback);
        assert_eq!(select_strategy(ErrorKind::RateLimited, HalfOpen, true), CacheFallback);
        assert_eq!(select_strategy(ErrorKind::AuthError, Closed, true), DefaultPermissions);
        assert_eq!(select_strategy(ErrorKind::ServerError, Closed, true), RetryWithBackoff);
        assert_eq!(select_strategy(ErrorKind::PermissionDenied, Closed, true), GracefulDegradation);
        assert_eq!(select_strategy(ErrorKind::Unknown, Closed, true), CacheFallback);
    }

    #[test]
    fn test_open_breaker_overrides_every_kind() {
        for kind in ErrorKind::ALL {
            for online in [true, false] {
                assert_eq!(
                    select_strategy(kind, BreakerState::Open, online),
                    FallbackStrategy::OfflineMode
                );
            }
        }
    }

    #[test]
    fn test_auth_and_denied_do_not_trip_breaker() {
        assert!(!ErrorKind::AuthError.trips_breaker());
        assert!(!ErrorKind::PermissionDenied.trips_breaker());
        assert!(ErrorKind::NetworkError.trips_breaker());
    }
}
