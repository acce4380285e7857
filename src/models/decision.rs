//! Resolved permission decisions.

use serde::{Deserialize, Serialize};

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// In-memory cache (or mirror via cache fallback)
    Cache,
    /// Fresh answer from the origin
    Origin,
    /// Configured default permissions
    Default,
    /// Durable mirror while offline
    Offline,
    /// Default permissions while offline
    OfflineDefault,
    /// Origin answer obtained by a retry
    Retry,
    /// Denied because the origin refused to evaluate
    Degraded,
}

/// A resolved check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub source: DecisionSource,
    /// True when the answer is not authoritative
    pub fallback: bool,
}

impl Decision {
    pub fn cached(allowed: bool) -> Self {
        Self {
            allowed,
            source: DecisionSource::Cache,
            fallback: false,
        }
    }

    pub fn authoritative(allowed: bool) -> Self {
        Self {
            allowed,
            source: DecisionSource::Origin,
            fallback: false,
        }
    }

    pub fn retried(allowed: bool) -> Self {
        Self {
            allowed,
            source: DecisionSource::Retry,
            fallback: false,
        }
    }

    pub fn fallback(allowed: bool, source: DecisionSource) -> Self {
        Self {
            allowed,
            source,
            fallback: true,
        }
    }

    /// The answer of last resort.
    pub fn deny_by_default() -> Self {
        Self::fallback(false, DecisionSource::Default)
    }
}
