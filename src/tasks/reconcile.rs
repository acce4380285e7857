//! Periodic reconciliation
//!
//! Catches pushes the live channel missed: for every actor in the cache, the
//! origin snapshot replaces what is cached (server wins). Snapshots carry no
//! context, so context-scoped entries are left to their TTL.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheManager, Invalidation};
use crate::ports::{CheckRequest, OriginService};
use crate::resilience::ResilienceCoordinator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub actors: usize,
    /// Entries written from snapshots
    pub updated: usize,
    /// Cached entries absent from the snapshot
    pub removed: usize,
    /// Actors whose snapshot could not be fetched
    pub failed: usize,
}

/// Merges one snapshot per cached actor into the cache.
pub async fn reconcile_once(cache: &CacheManager, origin: &dyn OriginService) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for actor_id in cache.actors().await {
        report.actors += 1;
        let snapshot = match origin.snapshot(&actor_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(actor_id = %actor_id, error = %err, "Snapshot fetch failed");
                report.failed += 1;
                continue;
            }
        };

        let mut authoritative = HashSet::new();
        for grant in &snapshot.grants {
            let request = CheckRequest::new(&actor_id, &grant.resource, &grant.action);
            authoritative.insert(cache_key(&request));
            match cache.store_decision(&request, grant.allowed).await {
                Ok(()) => report.updated += 1,
                Err(err) => warn!(actor_id = %actor_id, error = %err, "Snapshot grant not cached"),
            }
        }

        for key in cache.unscoped_keys_for_actor(&actor_id).await {
            if !authoritative.contains(&key) {
                report.removed += cache.invalidate(Invalidation::Key(key)).await;
            }
        }
    }
    report
}

/// Spawns the reconciliation loop. Runs are skipped while offline.
pub fn spawn_reconcile_task(
    cache: Arc<CacheManager>,
    origin: Arc<dyn OriginService>,
    coordinator: Arc<ResilienceCoordinator>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting reconciliation task");

        loop {
            tokio::time::sleep(interval).await;

            if coordinator.is_offline_mode() {
                debug!("Offline, skipping reconciliation");
                continue;
            }
            let report = reconcile_once(&cache, origin.as_ref()).await;
            info!(
                actors = report.actors,
                updated = report.updated,
                removed = report.removed,
                failed = report.failed,
                "Reconciliation finished"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryDurableStore, MemoryOrigin};
    use crate::cache::{GetOptions, PermissionValue};
    use crate::config::CacheConfig;

    async fn cache() -> CacheManager {
        let cache = CacheManager::new(
            CacheConfig::default(),
            Arc::new(MemoryDurableStore::new()),
            Arc::new(ManualClock::new(1_000)),
        );
        cache.init().await;
        cache
    }

    #[tokio::test]
    async fn test_server_wins() {
        let cache = cache().await;
        let origin = MemoryOrigin::new();
        origin.grant("u1", "orders", "read", false);

        let changed = CheckRequest::new("u1", "orders", "read");
        let revoked = CheckRequest::new("u1", "invoices", "read");
        cache.store_decision(&changed, true).await.unwrap();
        cache.store_decision(&revoked, true).await.unwrap();

        let report = reconcile_once(&cache, &origin).await;

        assert_eq!(report.actors, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(
            cache.get(&cache_key(&changed), GetOptions::memory_only()).await,
            Some(PermissionValue::Flag(false))
        );
        assert!(!cache.contains(&cache_key(&revoked)).await);
    }

    #[tokio::test]
    async fn test_revoked_actor_is_emptied() {
        let cache = cache().await;
        let origin = MemoryOrigin::new();
        origin.grant("u1", "orders", "read", true);
        let request = CheckRequest::new("u1", "orders", "read");
        cache.store_decision(&request, true).await.unwrap();

        origin.revoke_all("u1");
        let report = reconcile_once(&cache, &origin).await;

        assert_eq!(report.removed, 1);
        assert!(cache.keys_for_actor("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_context_scoped_entries_survive_reconcile() {
        let cache = cache().await;
        let origin = MemoryOrigin::new();
        origin.grant("u1", "orders", "read", true);
        let plain = CheckRequest::new("u1", "orders", "read");
        let scoped = CheckRequest::new("u1", "orders", "read").with_context("tenant", "acme");
        cache.store_decision(&plain, true).await.unwrap();
        cache.store_decision(&scoped, true).await.unwrap();

        let report = reconcile_once(&cache, &origin).await;

        assert_eq!(report.removed, 0);
        assert!(cache.contains(&cache_key(&plain)).await);
        assert!(cache.contains(&cache_key(&scoped)).await);
    }

    #[tokio::test]
    async fn test_failed_snapshot_leaves_cache_alone() {
        let cache = cache().await;
        let origin = MemoryOrigin::new();
        origin.set_healthy(false);
        let request = CheckRequest::new("u1", "orders", "read");
        cache.store_decision(&request, true).await.unwrap();

        let report = reconcile_once(&cache, &origin).await;

        assert_eq!(report.failed, 1);
        assert!(cache.contains(&cache_key(&request)).await);
    }
}
