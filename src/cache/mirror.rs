//! Persistent Mirror Module
//!
//! Durable copy of permission results, kept in a [`DurableStore`] under a
//! versioned namespace. Records carry their own long hard expiry and outlive
//! the in-memory map, so they can answer checks after a restart or while the
//! origin is unreachable.
//!
//! The store port has no enumeration, so the mirror keeps an index record
//! listing every key it wrote. Bumping the cache version purges everything the
//! index knows about from the previous version.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{EntryMeta, PermissionValue};
use crate::error::StorageError;
use crate::ports::DurableStore;

/// Prefix shared by every key the mirror writes.
pub const NAMESPACE: &str = "permcache";

// == Persistent Record ==
/// Stored layout: `{"data": {...}, "timestamp": ms, "expireTime": ms}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentRecord {
    pub data: RecordData,
    #[serde(rename = "timestamp")]
    pub cached_at: u64,
    #[serde(rename = "expireTime")]
    pub hard_expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordData {
    pub value: PermissionValue,
    pub actor_id: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub scoped: bool,
}

impl PersistentRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.hard_expires_at
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            scoped: self.data.scoped,
            ..EntryMeta::new(self.data.actor_id.clone(), self.data.resource.clone())
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MirrorIndex {
    version: u32,
    keys: BTreeSet<String>,
}

// == Persistent Mirror ==
pub struct PersistentMirror {
    store: Arc<dyn DurableStore>,
    version: u32,
    ttl_ms: u64,
    index: Mutex<BTreeSet<String>>,
}

impl PersistentMirror {
    /// Creates a mirror for `version` whose records live `ttl_ms` milliseconds.
    ///
    /// Call [`PersistentMirror::load`] before use so the key index and any
    /// version purge are applied.
    pub fn new(store: Arc<dyn DurableStore>, version: u32, ttl_ms: u64) -> Self {
        Self {
            store,
            version,
            ttl_ms,
            index: Mutex::new(BTreeSet::new()),
        }
    }

    // == Load ==
    /// Reads the key index and drops every record from an older version.
    pub async fn load(&self) -> Result<(), StorageError> {
        let stored = match self.store.get(&index_key()).await? {
            Some(raw) => serde_json::from_str::<MirrorIndex>(&raw).unwrap_or_else(|err| {
                warn!(error = %err, "Mirror index unreadable, starting empty");
                MirrorIndex::default()
            }),
            None => MirrorIndex {
                version: self.version,
                keys: BTreeSet::new(),
            },
        };

        let mut index = self.index.lock().await;
        if stored.version != self.version {
            info!(
                old_version = stored.version,
                new_version = self.version,
                records = stored.keys.len(),
                "Cache version changed, purging mirrored records"
            );
            for key in &stored.keys {
                self.store.remove(key).await?;
            }
            index.clear();
        } else {
            *index = stored.keys;
        }
        self.persist_index(&index).await
    }

    // == Read ==
    /// Returns the live record for `key`, removing it if expired or corrupt.
    pub async fn read(&self, key: &str, now: u64) -> Result<Option<PersistentRecord>, StorageError> {
        let storage_key = self.storage_key(key);
        let Some(raw) = self.store.get(&storage_key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<PersistentRecord>(&raw) {
            Ok(record) if !record.is_expired(now) => Ok(Some(record)),
            Ok(_) => {
                debug!(key, "Mirrored record past hard expiry");
                self.remove(key).await?;
                Ok(None)
            }
            Err(err) => {
                warn!(key, error = %err, "Dropping corrupt mirrored record");
                self.remove(key).await?;
                Ok(None)
            }
        }
    }

    // == Write ==
    /// Mirrors a value, stamping it at `now`.
    pub async fn write(
        &self,
        key: &str,
        value: &PermissionValue,
        meta: &EntryMeta,
        now: u64,
    ) -> Result<(), StorageError> {
        let record = PersistentRecord {
            data: RecordData {
                value: value.clone(),
                actor_id: meta.actor_id.clone(),
                resource: meta.resource.clone(),
                scoped: meta.scoped,
            },
            cached_at: now,
            hard_expires_at: now + self.ttl_ms,
        };
        let storage_key = self.storage_key(key);
        self.store
            .set(&storage_key, serde_json::to_string(&record)?)
            .await?;

        let mut index = self.index.lock().await;
        if index.insert(storage_key) {
            self.persist_index(&index).await?;
        }
        Ok(())
    }

    // == Remove ==
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let storage_key = self.storage_key(key);
        self.store.remove(&storage_key).await?;

        let mut index = self.index.lock().await;
        if index.remove(&storage_key) {
            self.persist_index(&index).await?;
        }
        Ok(())
    }

    // == Purge Expired ==
    /// Removes every record past its hard expiry. Returns how many went.
    pub async fn purge_expired(&self, now: u64) -> Result<usize, StorageError> {
        let keys: Vec<String> = self.index.lock().await.iter().cloned().collect();
        let mut purged = 0;

        for storage_key in keys {
            let expired = match self.store.get(&storage_key).await? {
                Some(raw) => serde_json::from_str::<PersistentRecord>(&raw)
                    .map(|record| record.is_expired(now))
                    .unwrap_or(true),
                None => true,
            };
            if expired {
                self.store.remove(&storage_key).await?;
                self.index.lock().await.remove(&storage_key);
                purged += 1;
            }
        }

        if purged > 0 {
            let index = self.index.lock().await;
            self.persist_index(&index).await?;
        }
        Ok(purged)
    }

    /// Removes every record whose owner matches `pred`. Returns how many went.
    pub async fn remove_where<F>(&self, pred: F) -> Result<usize, StorageError>
    where
        F: Fn(&str, &EntryMeta) -> bool,
    {
        let prefix = self.storage_key("");
        let keys: Vec<String> = self.index.lock().await.iter().cloned().collect();
        let mut removed = 0;

        for storage_key in keys {
            let Some(raw) = self.store.get(&storage_key).await? else {
                continue;
            };
            let matched = match serde_json::from_str::<PersistentRecord>(&raw) {
                Ok(record) => {
                    let key = storage_key.strip_prefix(&prefix).unwrap_or(&storage_key);
                    pred(key, &record.meta())
                }
                Err(_) => true,
            };
            if matched {
                self.store.remove(&storage_key).await?;
                self.index.lock().await.remove(&storage_key);
                removed += 1;
            }
        }

        if removed > 0 {
            let index = self.index.lock().await;
            self.persist_index(&index).await?;
        }
        Ok(removed)
    }

    /// Removes every mirrored record of the current version.
    pub async fn purge_all(&self) -> Result<(), StorageError> {
        let mut index = self.index.lock().await;
        for storage_key in index.iter() {
            self.store.remove(storage_key).await?;
        }
        index.clear();
        self.persist_index(&index).await
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}:v{}:{}", NAMESPACE, self.version, key)
    }

    async fn persist_index(&self, keys: &BTreeSet<String>) -> Result<(), StorageError> {
        let index = MirrorIndex {
            version: self.version,
            keys: keys.clone(),
        };
        self.store
            .set(&index_key(), serde_json::to_string(&index)?)
            .await
    }
}

fn index_key() -> String {
    format!("{}:index", NAMESPACE)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryDurableStore;

    const DAY_MS: u64 = 24 * 60 * 60 * 1000;

    fn meta() -> EntryMeta {
        EntryMeta::new("u1", "orders")
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = PersistentMirror::new(store.clone(), 1, DAY_MS);
        mirror.load().await.unwrap();

        mirror.write("k1", &true.into(), &meta(), 1_000).await.unwrap();
        let record = mirror.read("k1", 2_000).await.unwrap().unwrap();

        assert_eq!(record.data.value, PermissionValue::Flag(true));
        assert_eq!(record.cached_at, 1_000);
        assert_eq!(record.hard_expires_at, 1_000 + DAY_MS);
        assert_eq!(record.meta(), meta());
    }

    #[tokio::test]
    async fn test_record_layout() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = PersistentMirror::new(store.clone(), 3, DAY_MS);
        mirror.load().await.unwrap();

        mirror.write("k1", &false.into(), &meta(), 5).await.unwrap();
        let raw = store.get("permcache:v3:k1").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(json["timestamp"], 5);
        assert_eq!(json["expireTime"], 5 + DAY_MS);
        assert_eq!(json["data"]["value"], false);
    }

    #[tokio::test]
    async fn test_expired_record_removed_on_read() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = PersistentMirror::new(store.clone(), 1, 100);
        mirror.load().await.unwrap();

        mirror.write("k1", &true.into(), &meta(), 0).await.unwrap();
        assert!(mirror.read("k1", 100).await.unwrap().is_some());
        assert!(mirror.read("k1", 101).await.unwrap().is_none());
        assert_eq!(mirror.len().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_record_dropped() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = PersistentMirror::new(store.clone(), 1, DAY_MS);
        mirror.load().await.unwrap();

        store.set("permcache:v1:bad", "{not json".to_string()).await.unwrap();
        assert!(mirror.read("bad", 0).await.unwrap().is_none());
        assert!(store.get("permcache:v1:bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_bump_purges_old_records() {
        let store = Arc::new(MemoryDurableStore::new());
        let v1 = PersistentMirror::new(store.clone(), 1, DAY_MS);
        v1.load().await.unwrap();
        v1.write("k1", &true.into(), &meta(), 0).await.unwrap();
        v1.write("k2", &true.into(), &meta(), 0).await.unwrap();

        let v2 = PersistentMirror::new(store.clone(), 2, DAY_MS);
        v2.load().await.unwrap();

        assert!(store.get("permcache:v1:k1").await.unwrap().is_none());
        assert!(store.get("permcache:v1:k2").await.unwrap().is_none());
        assert_eq!(v2.len().await, 0);
    }

    #[tokio::test]
    async fn test_same_version_keeps_records_across_reload() {
        let store = Arc::new(MemoryDurableStore::new());
        let first = PersistentMirror::new(store.clone(), 1, DAY_MS);
        first.load().await.unwrap();
        first.write("k1", &true.into(), &meta(), 0).await.unwrap();

        let reloaded = PersistentMirror::new(store.clone(), 1, DAY_MS);
        reloaded.load().await.unwrap();

        assert_eq!(reloaded.len().await, 1);
        assert!(reloaded.read("k1", 10).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(MemoryDurableStore::new());
        let mirror = PersistentMirror::new(store.clone(), 1, 1_000);
        mirror.load().await.unwrap();

        mirror.write("old", &true.into(), &meta(), 0).await.unwrap();
        mirror.write("new", &true.into(), &meta(), 900).await.unwrap();

        assert_eq!(mirror.purge_expired(1_500).await.unwrap(), 1);
        assert_eq!(mirror.len().await, 1);
    }
}
