//! TTL Cleanup Task
//!
//! Background task that periodically removes expired cache entries and
//! mirror records.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Spawns a background task that periodically cleans up expired entries.
///
/// The task runs until aborted, sleeping `interval` between runs.
///
/// # Example
/// ```ignore
/// let cleanup_handle = spawn_cleanup_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<CacheManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Starting TTL cleanup task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let (memory, mirrored) = cache.cleanup_expired().await;
            if memory + mirrored > 0 {
                info!(memory, mirrored, "TTL cleanup removed expired entries");
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryDurableStore};
    use crate::cache::{cache_key, EntryMeta, SetOptions};
    use crate::config::CacheConfig;
    use crate::ports::CheckRequest;

    fn cache(clock: Arc<ManualClock>) -> Arc<CacheManager> {
        Arc::new(CacheManager::new(
            CacheConfig::default(),
            Arc::new(MemoryDurableStore::new()),
            clock,
        ))
    }

    async fn insert(cache: &CacheManager, resource: &str, ttl: Duration) -> String {
        let request = CheckRequest::new("u1", resource, "read");
        let key = cache_key(&request);
        let options = SetOptions {
            ttl: Some(ttl),
            ..SetOptions::default()
        };
        cache
            .set(&key, true.into(), EntryMeta::from_request(&request), options)
            .await
            .unwrap();
        key
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = cache(clock.clone());
        let short = insert(&cache, "orders", Duration::from_secs(1)).await;
        let long = insert(&cache, "invoices", Duration::from_secs(3600)).await;

        clock.advance(Duration::from_secs(2));
        let handle = spawn_cleanup_task(cache.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!cache.contains(&short).await, "Expired entry should have been cleaned up");
        assert!(cache.contains(&long).await, "Valid entry should not be removed");

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let cache = cache(Arc::new(ManualClock::new(0)));

        let handle = spawn_cleanup_task(cache, Duration::from_secs(1));
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
