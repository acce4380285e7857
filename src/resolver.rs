//! Permission Resolver
//!
//! The public entry point. Answers checks from the cache, falls through to the
//! origin via the resilience coordinator, and owns the background tasks.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{cache_key, CacheEvent, CacheManager, CacheStats, GetOptions, Invalidation};
use crate::config::Config;
use crate::events::EventEmitter;
use crate::models::Decision;
use crate::ports::{CheckRequest, Clock, DurableStore, LiveTransport, NetworkStatus, OriginService};
use crate::resilience::{
    BreakerState, ErrorRecord, FallbackStrategy, ResilienceCoordinator, ResilienceEvent,
};
use crate::sync::{ConnectionState, SyncChannel, SyncEvent};
use crate::tasks::{
    spawn_cleanup_task, spawn_network_watcher, spawn_reconcile_task, spawn_recovery_task,
};

/// Collaborators the resolver is built from.
#[derive(Clone)]
pub struct ResolverPorts {
    pub origin: Arc<dyn OriginService>,
    pub durable: Arc<dyn DurableStore>,
    pub transport: Arc<dyn LiveTransport>,
    pub network: Arc<dyn NetworkStatus>,
    pub clock: Arc<dyn Clock>,
}

/// Combined view returned by [`PermissionResolver::cache_stats`].
#[derive(Debug, Clone, Serialize)]
pub struct ResolverStats {
    pub size: usize,
    pub hit_rate: f64,
    /// Strategy of the most recent fallback
    pub strategy: Option<FallbackStrategy>,
    pub breaker_state: BreakerState,
    pub offline_mode: bool,
    pub connection: ConnectionState,
    pub retry_queue: usize,
    pub cache: CacheStats,
}

// == Permission Resolver ==
pub struct PermissionResolver {
    config: Config,
    origin: Arc<dyn OriginService>,
    network: Arc<dyn NetworkStatus>,
    cache: Arc<CacheManager>,
    coordinator: Arc<ResilienceCoordinator>,
    sync: Arc<SyncChannel>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PermissionResolver {
    pub fn new(config: Config, ports: ResolverPorts) -> Self {
        let cache = Arc::new(CacheManager::new(
            config.cache.clone(),
            ports.durable,
            ports.clock.clone(),
        ));
        let coordinator = Arc::new(ResilienceCoordinator::new(
            config.resilience.clone(),
            ports.origin.clone(),
            cache.clone(),
            ports.network.clone(),
            ports.clock.clone(),
        ));
        let sync = Arc::new(SyncChannel::new(
            config.sync.clone(),
            cache.clone(),
            ports.transport,
            ports.network.clone(),
            ports.clock,
        ));

        Self {
            config,
            origin: ports.origin,
            network: ports.network,
            cache,
            coordinator,
            sync,
            tasks: Mutex::new(Vec::new()),
        }
    }

    // == Lifecycle ==
    /// Loads the durable mirror, opens the live channel and spawns the
    /// background tasks. Calling it again restarts them.
    pub async fn start(&self) {
        self.cache.init().await;
        if !self.network.is_online() {
            self.coordinator.enter_offline_mode("network offline at startup");
        }

        let handles = vec![
            spawn_cleanup_task(self.cache.clone(), self.config.cache.cleanup_interval),
            spawn_reconcile_task(
                self.cache.clone(),
                self.origin.clone(),
                self.coordinator.clone(),
                self.config.sync.reconcile_interval,
            ),
            spawn_recovery_task(
                self.coordinator.clone(),
                self.config.resilience.health_check_interval,
            ),
            spawn_network_watcher(
                self.network.clone(),
                self.coordinator.clone(),
                self.sync.clone(),
            ),
        ];
        let previous = std::mem::replace(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
            handles,
        );
        for handle in previous {
            handle.abort();
        }

        self.sync.connect();
        info!("Permission resolver started");
    }

    /// Stops the live channel and every background task.
    pub fn shutdown(&self) {
        self.sync.disconnect();
        let handles =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            handle.abort();
        }
        info!("Permission resolver stopped");
    }

    // == Check ==
    /// Resolves a permission check. Always produces a decision.
    pub async fn check(&self, request: &CheckRequest) -> Decision {
        let guarded = AssertUnwindSafe(self.resolve(request)).catch_unwind().await;
        guarded.unwrap_or_else(|_| {
            error!(
                actor_id = %request.actor_id,
                resource = %request.resource,
                "Permission resolution panicked, denying"
            );
            Decision::deny_by_default()
        })
    }

    async fn resolve(&self, request: &CheckRequest) -> Decision {
        let key = cache_key(request);
        if let Some(value) = self.cache.get(&key, GetOptions::memory_only()).await {
            debug!(actor_id = %request.actor_id, resource = %request.resource, "Cache hit");
            return Decision::cached(value.allows(&request.action));
        }

        // Taken before the origin call; any change pushed meanwhile wins.
        let ticket = self.cache.write_ticket(&request.actor_id);
        let outcome = self.coordinator.execute(request).await;
        if !outcome.decision.fallback {
            match self
                .cache
                .store_decision_if_current(request, outcome.decision.allowed, ticket)
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!(
                    actor_id = %request.actor_id,
                    resource = %request.resource,
                    "Actor changed during origin call, answer not cached"
                ),
                Err(err) => warn!(error = %err, "Write-through failed"),
            }
        }
        outcome.decision
    }

    // == Invalidate ==
    pub async fn invalidate(&self, target: Invalidation) -> usize {
        self.cache.invalidate(target).await
    }

    // == Stats ==
    pub async fn cache_stats(&self) -> ResolverStats {
        let cache = self.cache.stats().await;
        ResolverStats {
            size: cache.total_entries,
            hit_rate: cache.hit_rate(),
            strategy: self.coordinator.last_strategy().await,
            breaker_state: self.coordinator.breaker_state().await,
            offline_mode: self.coordinator.is_offline_mode(),
            connection: self.sync.state(),
            retry_queue: self.coordinator.retry_queue_len().await,
            cache,
        }
    }

    pub async fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.coordinator.recent_errors().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.sync.state()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<ResilienceCoordinator> {
        &self.coordinator
    }

    pub fn sync(&self) -> &Arc<SyncChannel> {
        &self.sync
    }

    // == Events ==
    pub fn cache_events(&self) -> &EventEmitter<CacheEvent> {
        self.cache.events()
    }

    pub fn resilience_events(&self) -> &EventEmitter<ResilienceEvent> {
        self.coordinator.events()
    }

    pub fn sync_events(&self) -> &EventEmitter<SyncEvent> {
        self.sync.events()
    }
}

impl Drop for PermissionResolver {
    fn drop(&mut self) {
        for handle in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        ChannelTransport, ManualClock, MemoryDurableStore, MemoryOrigin, WatchNetworkStatus,
    };
    use crate::models::DecisionSource;

    fn resolver(origin: Arc<MemoryOrigin>) -> PermissionResolver {
        let (transport, _accept) = ChannelTransport::new();
        PermissionResolver::new(
            Config::default(),
            ResolverPorts {
                origin,
                durable: Arc::new(MemoryDurableStore::new()),
                transport: Arc::new(transport),
                network: Arc::new(WatchNetworkStatus::new(true)),
                clock: Arc::new(ManualClock::new(1_000_000)),
            },
        )
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.grant("u1", "orders", "read", true);
        let resolver = resolver(origin.clone());
        let request = CheckRequest::new("u1", "orders", "read");

        assert_eq!(resolver.check(&request).await, Decision::authoritative(true));
        assert_eq!(resolver.check(&request).await, Decision::cached(true));
        assert_eq!(origin.calls(), 1);

        let stats = resolver.cache_stats().await;
        assert_eq!(stats.size, 1);
        assert_eq!(stats.breaker_state, BreakerState::Closed);
        assert!(!stats.offline_mode);
    }

    #[tokio::test]
    async fn test_fallback_decisions_are_not_cached() {
        let origin = Arc::new(MemoryOrigin::new());
        origin.fail_next([crate::error::OriginError::Denied("locked".to_string())]);
        let resolver = resolver(origin);
        let request = CheckRequest::new("u1", "orders", "read");

        let decision = resolver.check(&request).await;
        assert_eq!(decision.source, DecisionSource::Degraded);
        assert!(resolver.cache().is_empty().await);
        assert_eq!(resolver.recent_errors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let resolver = resolver(Arc::new(MemoryOrigin::new()));
        resolver.start().await;
        assert_eq!(resolver.tasks.lock().unwrap().len(), 4);

        resolver.shutdown();
        assert!(resolver.tasks.lock().unwrap().is_empty());
        assert_eq!(resolver.connection_state(), ConnectionState::Disconnected);
    }
}
