//! Resilience Coordinator
//!
//! Sends origin checks through the circuit breaker and turns every failure
//! into a [`Decision`] via a fallback strategy. Also owns offline mode, the
//! retry queue replayed on recovery, and the diagnostic error log.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheManager, GetOptions};
use crate::config::ResilienceConfig;
use crate::error::OriginError;
use crate::events::EventEmitter;
use crate::models::{Decision, DecisionSource};
use crate::ports::{CheckRequest, Clock, NetworkStatus, OriginService};
use crate::resilience::breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::retry::{RetryQueue, RetryTask};
use crate::resilience::strategy::{select_strategy, ErrorKind, FallbackStrategy};
use crate::resilience::ResilienceEvent;

/// What the coordinator produced for one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResilienceOutcome {
    /// False when the decision rests on defaults rather than any stored answer
    pub success: bool,
    /// None when the origin answered directly
    pub strategy: Option<FallbackStrategy>,
    pub decision: Decision,
}

/// One handled failure, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// Clock time (Unix milliseconds)
    pub at: u64,
    pub kind: ErrorKind,
    pub message: String,
    pub actor_id: String,
    pub resource: String,
    pub strategy: FallbackStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub replayed: usize,
    /// Already superseded by a newer cached value
    pub skipped: usize,
    pub requeued: usize,
    pub dropped: usize,
}

// == Resilience Coordinator ==
pub struct ResilienceCoordinator {
    config: ResilienceConfig,
    origin: Arc<dyn OriginService>,
    cache: Arc<CacheManager>,
    network: Arc<dyn NetworkStatus>,
    clock: Arc<dyn Clock>,
    breaker: Mutex<CircuitBreaker>,
    retry_queue: Mutex<RetryQueue>,
    errors: Mutex<VecDeque<ErrorRecord>>,
    default_allow: HashSet<String>,
    offline: AtomicBool,
    last_strategy: Mutex<Option<FallbackStrategy>>,
    recovery_requested: Notify,
    events: EventEmitter<ResilienceEvent>,
}

impl ResilienceCoordinator {
    pub fn new(
        config: ResilienceConfig,
        origin: Arc<dyn OriginService>,
        cache: Arc<CacheManager>,
        network: Arc<dyn NetworkStatus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::from(&config));
        Self {
            breaker: Mutex::new(breaker),
            retry_queue: Mutex::new(RetryQueue::new(config.retry_queue_capacity)),
            errors: Mutex::new(VecDeque::with_capacity(config.error_log_capacity)),
            default_allow: config.default_allow.iter().cloned().collect(),
            config,
            origin,
            cache,
            network,
            clock,
            offline: AtomicBool::new(false),
            last_strategy: Mutex::new(None),
            recovery_requested: Notify::new(),
            events: EventEmitter::new(),
        }
    }

    // == Execute ==
    /// Asks the origin, falling back as needed. Never fails.
    pub async fn execute(&self, request: &CheckRequest) -> ResilienceOutcome {
        if !self.network.is_online() {
            self.enter_offline_mode("network offline");
            return self
                .fallback(
                    request,
                    ErrorKind::NetworkError,
                    "network offline".to_string(),
                    FallbackStrategy::OfflineMode,
                )
                .await;
        }

        if !self.admit().await {
            return self
                .fallback(
                    request,
                    ErrorKind::CircuitOpen,
                    "circuit breaker open".to_string(),
                    FallbackStrategy::OfflineMode,
                )
                .await;
        }

        match self.call_origin(request).await {
            Ok(allowed) => ResilienceOutcome {
                success: true,
                strategy: None,
                decision: Decision::authoritative(allowed),
            },
            Err(err) => {
                let kind = ErrorKind::classify(&err);
                let state = self.breaker_state().await;
                let strategy = select_strategy(kind, state, self.network.is_online());
                self.fallback(request, kind, err.to_string(), strategy).await
            }
        }
    }

    async fn admit(&self) -> bool {
        let now = self.clock.now_ms();
        let mut breaker = self.breaker.lock().await;
        let before = breaker.state();
        let admitted = breaker.admit(now);
        if before == BreakerState::Open && admitted {
            info!("Circuit breaker half-open, probing origin");
        }
        admitted
    }

    /// One origin call under the call deadline, recorded on the breaker.
    async fn call_origin(&self, request: &CheckRequest) -> Result<bool, OriginError> {
        let result = match timeout(self.config.origin_timeout, self.origin.check(request)).await {
            Ok(result) => result,
            Err(_) => Err(OriginError::Timeout),
        };

        match &result {
            Ok(_) => {
                if self.breaker.lock().await.record_success() {
                    info!("Circuit breaker closed");
                }
                if self.is_offline_mode() {
                    // Only a health probe ends offline mode.
                    self.recovery_requested.notify_one();
                }
            }
            Err(err) => {
                let kind = ErrorKind::classify(err);
                if kind.trips_breaker() {
                    let now = self.clock.now_ms();
                    let (opened, failure_count) = {
                        let mut breaker = self.breaker.lock().await;
                        let opened = breaker.record_failure(now);
                        (opened, breaker.snapshot().failure_count)
                    };
                    if opened {
                        warn!(failure_count, "Circuit breaker opened");
                        self.events
                            .emit(&ResilienceEvent::CircuitBreakerOpened { failure_count });
                        self.enter_offline_mode("circuit breaker opened");
                    }
                }
            }
        }
        result
    }

    // == Strategies ==
    async fn fallback(
        &self,
        request: &CheckRequest,
        kind: ErrorKind,
        message: String,
        strategy: FallbackStrategy,
    ) -> ResilienceOutcome {
        debug!(
            actor_id = %request.actor_id,
            resource = %request.resource,
            kind = %kind,
            strategy = %strategy,
            "Origin check failed, applying fallback"
        );
        self.record_error(request, kind, message, strategy).await;

        let outcome = match strategy {
            FallbackStrategy::RetryWithBackoff => self.retry_with_backoff(request).await,
            FallbackStrategy::CacheFallback => self.cache_fallback(request).await,
            FallbackStrategy::OfflineMode => self.offline_fallback(request).await,
            FallbackStrategy::DefaultPermissions => ResilienceOutcome {
                success: true,
                strategy: Some(FallbackStrategy::DefaultPermissions),
                decision: Decision::fallback(self.default_allows(request), DecisionSource::Default),
            },
            FallbackStrategy::GracefulDegradation => ResilienceOutcome {
                success: true,
                strategy: Some(FallbackStrategy::GracefulDegradation),
                decision: Decision::fallback(false, DecisionSource::Degraded),
            },
        };

        *self.last_strategy.lock().await = outcome.strategy;
        outcome
    }

    async fn retry_with_backoff(&self, request: &CheckRequest) -> ResilienceOutcome {
        for attempt in 0..self.config.max_retries {
            sleep(self.config.retry_backoff.delay(attempt)).await;
            if !self.network.is_online() || !self.admit().await {
                return self.offline_fallback(request).await;
            }
            match self.call_origin(request).await {
                Ok(allowed) => {
                    info!(attempt = attempt + 1, resource = %request.resource, "Retry succeeded");
                    return ResilienceOutcome {
                        success: true,
                        strategy: Some(FallbackStrategy::RetryWithBackoff),
                        decision: Decision::retried(allowed),
                    };
                }
                Err(err) => {
                    let kind = ErrorKind::classify(&err);
                    debug!(attempt = attempt + 1, kind = %kind, "Retry failed");
                    if !kind.is_transient() {
                        break;
                    }
                }
            }
        }

        if self.breaker_state().await == BreakerState::Open {
            self.offline_fallback(request).await
        } else {
            self.cache_fallback(request).await
        }
    }

    async fn cache_fallback(&self, request: &CheckRequest) -> ResilienceOutcome {
        let cached = self
            .cache
            .get(&cache_key(request), GetOptions::with_offline_fallback())
            .await;
        match cached {
            Some(value) => ResilienceOutcome {
                success: true,
                strategy: Some(FallbackStrategy::CacheFallback),
                decision: Decision::fallback(value.allows(&request.action), DecisionSource::Cache),
            },
            None => ResilienceOutcome {
                success: false,
                strategy: Some(FallbackStrategy::CacheFallback),
                decision: Decision::fallback(self.default_allows(request), DecisionSource::Default),
            },
        }
    }

    async fn offline_fallback(&self, request: &CheckRequest) -> ResilienceOutcome {
        self.enter_offline_mode("origin unreachable");
        let now = self.clock.now_ms();
        if self.retry_queue.lock().await.push(request.clone(), now) {
            debug!(resource = %request.resource, "Queued check for replay");
        }

        let cached = self
            .cache
            .get(&cache_key(request), GetOptions::with_offline_fallback())
            .await;
        let (success, decision) = match cached {
            Some(value) => (
                true,
                Decision::fallback(value.allows(&request.action), DecisionSource::Offline),
            ),
            None => (
                false,
                Decision::fallback(self.default_allows(request), DecisionSource::OfflineDefault),
            ),
        };
        ResilienceOutcome {
            success,
            strategy: Some(FallbackStrategy::OfflineMode),
            decision,
        }
    }

    fn default_allows(&self, request: &CheckRequest) -> bool {
        self.default_allow
            .contains(&format!("{}:{}", request.resource, request.action))
            || self.default_allow.contains(&format!("{}:*", request.resource))
    }

    // == Offline Mode ==
    /// Returns true if this call switched offline mode on.
    pub fn enter_offline_mode(&self, reason: &str) -> bool {
        if self.offline.swap(true, Ordering::SeqCst) {
            return false;
        }
        warn!(reason, "Offline mode enabled");
        self.events.emit(&ResilienceEvent::OfflineModeEnabled {
            reason: reason.to_string(),
        });
        true
    }

    /// Leaves offline mode and closes the breaker. Returns true if offline
    /// mode was active. Queued checks are replayed separately.
    pub async fn exit_offline_mode(&self) -> bool {
        if !self.offline.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.breaker.lock().await.reset();
        info!("Offline mode disabled");
        self.events.emit(&ResilienceEvent::OfflineModeDisabled);
        true
    }

    pub fn is_offline_mode(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Probes origin health when offline and online again; on success leaves
    /// offline mode and replays the retry queue.
    pub async fn try_recover(&self) -> bool {
        if !self.is_offline_mode() || !self.network.is_online() {
            return false;
        }
        match timeout(self.config.health_timeout, self.origin.health_check()).await {
            Ok(Ok(())) => {
                if self.exit_offline_mode().await {
                    let report = self.replay_retry_queue().await;
                    info!(?report, "Recovered from offline mode");
                }
                true
            }
            Ok(Err(err)) => {
                debug!(error = %err, "Health probe failed, staying offline");
                false
            }
            Err(_) => {
                debug!("Health probe timed out, staying offline");
                false
            }
        }
    }

    /// Resolves once an origin call succeeded while offline, asking for an
    /// early [`Self::try_recover`].
    pub async fn recovery_requested(&self) {
        self.recovery_requested.notified().await;
    }

    // == Retry Queue ==
    /// Re-runs queued checks oldest first, writing fresh answers to the cache.
    pub async fn replay_retry_queue(&self) -> ReplayReport {
        let tasks = self.retry_queue.lock().await.drain();
        let mut report = ReplayReport::default();
        let mut leftover: Vec<RetryTask> = Vec::new();
        let mut pending = tasks.into_iter();

        while let Some(mut task) = pending.next() {
            let key = cache_key(&task.request);
            if let Some(written_at) = self.cache.written_at(&key).await {
                if written_at > task.scheduled_at {
                    report.skipped += 1;
                    continue;
                }
            }

            if !self.network.is_online() || !self.admit().await {
                leftover.push(task);
                leftover.extend(pending.by_ref());
                break;
            }

            let ticket = self.cache.write_ticket(&task.request.actor_id);
            match self.call_origin(&task.request).await {
                Ok(allowed) => {
                    match self
                        .cache
                        .store_decision_if_current(&task.request, allowed, ticket)
                        .await
                    {
                        Ok(true) => report.replayed += 1,
                        Ok(false) => report.skipped += 1,
                        Err(err) => {
                            warn!(error = %err, "Replayed answer not cached");
                            report.replayed += 1;
                        }
                    }
                }
                Err(err) => {
                    task.attempts += 1;
                    let kind = ErrorKind::classify(&err);
                    if kind.is_transient() && task.attempts < self.config.max_retries.max(1) {
                        leftover.push(task);
                    } else {
                        debug!(kind = %kind, attempts = task.attempts, "Dropping retry task");
                        report.dropped += 1;
                    }
                }
            }
        }

        report.requeued = leftover.len();
        if !leftover.is_empty() {
            let mut queue = self.retry_queue.lock().await;
            for task in leftover {
                queue.requeue(task);
            }
        }
        report
    }

    pub async fn retry_queue_len(&self) -> usize {
        self.retry_queue.lock().await.len()
    }

    // == Diagnostics ==
    async fn record_error(
        &self,
        request: &CheckRequest,
        kind: ErrorKind,
        message: String,
        strategy: FallbackStrategy,
    ) {
        let capacity = self.config.error_log_capacity;
        if capacity == 0 {
            return;
        }
        let record = ErrorRecord {
            at: self.clock.now_ms(),
            kind,
            message,
            actor_id: request.actor_id.clone(),
            resource: request.resource.clone(),
            strategy,
        };
        let mut errors = self.errors.lock().await;
        while errors.len() >= capacity {
            errors.pop_front();
        }
        errors.push_back(record);
    }

    /// Handled failures, oldest first.
    pub async fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().await.iter().cloned().collect()
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().await.state()
    }

    pub async fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.lock().await.snapshot()
    }

    /// Strategy used by the most recent fallback, if any.
    pub async fn last_strategy(&self) -> Option<FallbackStrategy> {
        *self.last_strategy.lock().await
    }

    pub fn events(&self) -> &EventEmitter<ResilienceEvent> {
        &self.events
    }
}
