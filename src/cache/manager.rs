//! Cache Manager Module
//!
//! Combines the in-memory entry store with the durable mirror. Reads fall
//! back to the mirror on request; writes go to memory first and are mirrored
//! afterwards. The store lock is released before any durable I/O.
//!
//! Every invalidation bumps an epoch for the actor it touches (or a global
//! one). A write started under a [`WriteTicket`] is dropped if an epoch moved
//! while it was in flight, so a late origin answer never resurrects an entry
//! that a newer change removed.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::mirror::PersistentMirror;
use crate::cache::store::{EntryStore, Lookup};
use crate::cache::{
    cache_key, CacheEntry, CacheEvent, CacheStats, EntryMeta, EvictionPolicy, PermissionValue,
    Priority, ResourceClass,
};
use crate::config::CacheConfig;
use crate::error::{Result, StorageError};
use crate::events::EventEmitter;
use crate::ports::{CheckRequest, Clock, DurableStore};

// == Options ==
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Consult the durable mirror when memory has nothing usable
    pub fallback_to_offline: bool,
}

impl GetOptions {
    pub fn memory_only() -> Self {
        Self {
            fallback_to_offline: false,
        }
    }

    pub fn with_offline_fallback() -> Self {
        Self {
            fallback_to_offline: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Overrides the resource-class TTL
    pub ttl: Option<Duration>,
    pub priority: Priority,
    /// Exempt from eviction and always mirrored
    pub persistent: bool,
}

// == Invalidation ==
/// What to drop from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// One exact cache key
    Key(String),
    /// Every entry of an actor
    Actor(String),
    /// Entries of an actor for one resource
    ActorResource { actor_id: String, resource: String },
    /// Entries of an actor in one resource class
    ActorClass { actor_id: String, class: ResourceClass },
    /// Every entry for a resource, across actors
    Resource(String),
    All,
}

impl Invalidation {
    fn matches(&self, key: &str, meta: &EntryMeta) -> bool {
        match self {
            Invalidation::Key(target) => key == target,
            Invalidation::Actor(actor_id) => meta.actor_id == *actor_id,
            Invalidation::ActorResource { actor_id, resource } => {
                meta.actor_id == *actor_id && meta.resource == *resource
            }
            Invalidation::ActorClass { actor_id, class } => {
                meta.actor_id == *actor_id && meta.class() == *class
            }
            Invalidation::Resource(resource) => meta.resource == *resource,
            Invalidation::All => true,
        }
    }

    /// The single actor this invalidation is limited to, if any.
    fn actor(&self) -> Option<&str> {
        match self {
            Invalidation::Actor(actor_id)
            | Invalidation::ActorResource { actor_id, .. }
            | Invalidation::ActorClass { actor_id, .. } => Some(actor_id),
            Invalidation::Key(_) | Invalidation::Resource(_) | Invalidation::All => None,
        }
    }
}

// == Write Tickets ==
/// Invalidation epochs observed when a write-through was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTicket {
    global: u64,
    actor: u64,
}

#[derive(Debug, Default)]
struct Epochs {
    global: u64,
    actors: HashMap<String, u64>,
}

impl Epochs {
    fn ticket(&self, actor_id: &str) -> WriteTicket {
        WriteTicket {
            global: self.global,
            actor: self.actors.get(actor_id).copied().unwrap_or(0),
        }
    }

    fn bump_actor(&mut self, actor_id: &str) {
        *self.actors.entry(actor_id.to_string()).or_default() += 1;
    }

    fn bump(&mut self, target: &Invalidation) {
        match target.actor() {
            Some(actor_id) => self.bump_actor(actor_id),
            None => self.global += 1,
        }
    }
}

// == Cache Manager ==
pub struct CacheManager {
    store: RwLock<EntryStore>,
    mirror: PersistentMirror,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    memory_only: AtomicBool,
    epochs: StdMutex<Epochs>,
    events: EventEmitter<CacheEvent>,
}

impl CacheManager {
    pub fn new(config: CacheConfig, durable: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        let mirror = PersistentMirror::new(
            durable,
            config.version,
            config.mirror_ttl.as_millis() as u64,
        );
        Self {
            store: RwLock::new(EntryStore::new(config.max_entries, config.eviction_policy)),
            mirror,
            clock,
            config,
            memory_only: AtomicBool::new(false),
            epochs: StdMutex::new(Epochs::default()),
            events: EventEmitter::new(),
        }
    }

    // == Init ==
    /// Loads the mirror index. A store that cannot be read leaves the cache
    /// running memory-only.
    pub async fn init(&self) {
        if let Err(err) = self.mirror.load().await {
            warn!(error = %err, "Durable mirror unavailable, caching in memory only");
            self.degrade_to_memory_only().await;
        }
    }

    // == Get ==
    /// Returns the cached value for `key`, or None.
    ///
    /// An expired or missing entry only counts as a miss after the mirror has
    /// been consulted (when `fallback_to_offline` is set). A mirror hit is
    /// promoted back into memory with a fresh class TTL.
    pub async fn get(&self, key: &str, options: GetOptions) -> Option<PermissionValue> {
        let now = self.clock.now_ms();
        let lookup = self.store.write().await.get(key, now);

        if let Lookup::Hit(value) = lookup {
            return Some(value);
        }

        if options.fallback_to_offline {
            match self.mirror.read(key, now).await {
                Ok(Some(record)) => {
                    let meta = record.meta();
                    let ttl = self.config.ttl_for(meta.class()).as_millis() as u64;
                    let mut entry = CacheEntry::new(
                        record.data.value.clone(),
                        meta,
                        now,
                        Some(ttl),
                        Priority::Normal,
                        false,
                    );
                    // Promoted entries keep their original write time.
                    entry.created_at = record.cached_at.min(now);
                    let promoted = {
                        let mut store = self.store.write().await;
                        store.record_offline_hit();
                        store.insert(key.to_string(), entry)
                    };
                    match promoted {
                        Ok(evicted) if !evicted.is_empty() => {
                            self.events.emit(&CacheEvent::Evicted {
                                count: evicted.len(),
                            });
                        }
                        Ok(_) => {}
                        Err(err) => debug!(key, error = %err, "Mirror hit not promoted"),
                    }
                    return Some(record.data.value);
                }
                Ok(None) => {}
                Err(err) => warn!(key, error = %err, "Mirror read failed"),
            }
        }

        self.store.write().await.record_miss();
        None
    }

    /// Creation time of the in-memory entry for `key`, if present and live.
    pub async fn written_at(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_ms();
        self.store
            .read()
            .await
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.created_at)
    }

    // == Set ==
    /// Writes `value` under `key` and mirrors it.
    ///
    /// Mirror failures never reach the caller; a full store gets one
    /// eviction retry before the cache degrades to memory-only.
    pub async fn set(
        &self,
        key: &str,
        value: PermissionValue,
        meta: EntryMeta,
        options: SetOptions,
    ) -> Result<()> {
        self.write(key, value, meta, options, None).await.map(|_| ())
    }

    /// Writes an authoritative verdict for `request` with class defaults.
    pub async fn store_decision(&self, request: &CheckRequest, allowed: bool) -> Result<()> {
        self.set(
            &cache_key(request),
            allowed.into(),
            EntryMeta::from_request(request),
            SetOptions::default(),
        )
        .await
    }

    /// Like [`Self::store_decision`], but skipped when the actor was
    /// invalidated or changed after `ticket` was taken. Returns whether the
    /// verdict was written.
    pub async fn store_decision_if_current(
        &self,
        request: &CheckRequest,
        allowed: bool,
        ticket: WriteTicket,
    ) -> Result<bool> {
        self.write(
            &cache_key(request),
            allowed.into(),
            EntryMeta::from_request(request),
            SetOptions::default(),
            Some(ticket),
        )
        .await
    }

    async fn write(
        &self,
        key: &str,
        value: PermissionValue,
        meta: EntryMeta,
        options: SetOptions,
        ticket: Option<WriteTicket>,
    ) -> Result<bool> {
        let now = self.clock.now_ms();
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.config.ttl_for(meta.class()))
            .as_millis() as u64;
        let entry = CacheEntry::new(
            value.clone(),
            meta.clone(),
            now,
            Some(ttl),
            options.priority,
            options.persistent,
        );

        let evicted = {
            let mut store = self.store.write().await;
            // Checked under the store lock; invalidate bumps epochs under it too.
            if ticket.is_some_and(|ticket| !self.is_current(&meta.actor_id, ticket)) {
                debug!(key, actor_id = %meta.actor_id, "Superseded write dropped");
                return Ok(false);
            }
            store.insert(key.to_string(), entry)?
        };
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Eviction pass completed");
            self.events.emit(&CacheEvent::Evicted {
                count: evicted.len(),
            });
        }

        if (options.persistent || self.config.mirror_writes) && !self.is_memory_only() {
            self.mirror_write(key, &value, &meta, now).await;
            if ticket.is_some_and(|ticket| !self.is_current(&meta.actor_id, ticket)) {
                // Invalidated while the record was being written
                if let Err(err) = self.mirror.remove(key).await {
                    debug!(key, error = %err, "Superseded mirror record not removed");
                }
            }
        }

        self.events.emit(&CacheEvent::Updated {
            key: key.to_string(),
        });
        Ok(true)
    }

    // == Epochs ==
    /// Captures the epochs a later [`Self::store_decision_if_current`] is
    /// checked against.
    pub fn write_ticket(&self, actor_id: &str) -> WriteTicket {
        self.epochs().ticket(actor_id)
    }

    /// Marks `actor_id` as changed, voiding tickets taken before now.
    pub fn mark_actor_changed(&self, actor_id: &str) {
        self.epochs().bump_actor(actor_id);
    }

    fn is_current(&self, actor_id: &str, ticket: WriteTicket) -> bool {
        self.epochs().ticket(actor_id) == ticket
    }

    fn epochs(&self) -> std::sync::MutexGuard<'_, Epochs> {
        self.epochs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn mirror_write(&self, key: &str, value: &PermissionValue, meta: &EntryMeta, now: u64) {
        match self.mirror.write(key, value, meta, now).await {
            Ok(()) => {}
            Err(StorageError::QuotaExceeded) => {
                info!(key, "Durable store full, evicting before one retry");
                self.free_mirror_space(key, now).await;
                if let Err(err) = self.mirror.write(key, value, meta, now).await {
                    warn!(key, error = %err, "Durable store still failing, caching in memory only");
                    self.degrade_to_memory_only().await;
                }
            }
            Err(err) => warn!(key, error = %err, "Mirror write failed"),
        }
    }

    /// The eviction step before the single retry: drop mirrored records past
    /// their hard expiry, then run one in-memory eviction pass and drop the
    /// victims' mirrored copies too.
    async fn free_mirror_space(&self, key: &str, now: u64) {
        match self.mirror.purge_expired(now).await {
            Ok(purged) => debug!(purged, "Purged expired mirror records"),
            Err(err) => debug!(error = %err, "Purging expired mirror records failed"),
        }

        let victims = self.store.write().await.evict_pass_sparing(key);
        if victims.is_empty() {
            return;
        }
        self.events.emit(&CacheEvent::Evicted {
            count: victims.len(),
        });
        for victim in &victims {
            if let Err(err) = self.mirror.remove(victim).await {
                debug!(key = %victim, error = %err, "Evicted record not removed from mirror");
            }
        }
    }

    async fn degrade_to_memory_only(&self) {
        self.memory_only.store(true, Ordering::SeqCst);
        self.store.write().await.set_memory_only();
    }

    // == Invalidate ==
    /// Removes matching entries from memory and the mirror. Returns how many
    /// in-memory entries went.
    pub async fn invalidate(&self, target: Invalidation) -> usize {
        let removed = {
            let mut store = self.store.write().await;
            self.epochs().bump(&target);
            store.remove_where(|key, entry| target.matches(key, &entry.meta))
        };

        let mirror_result = match &target {
            Invalidation::Key(key) => self.mirror.remove(key).await.map(|_| 1),
            Invalidation::All => self.mirror.purge_all().await.map(|_| 0),
            other => {
                self.mirror
                    .remove_where(|key, meta| other.matches(key, meta))
                    .await
            }
        };
        if let Err(err) = mirror_result {
            warn!(error = %err, target = ?target, "Mirror invalidation failed");
        }

        debug!(target = ?target, removed = removed.len(), "Cache invalidated");
        self.events.emit(&CacheEvent::Invalidated {
            target: target.clone(),
            removed: removed.len(),
        });
        removed.len()
    }

    // == Cleanup ==
    /// Drops expired entries from memory and the mirror.
    pub async fn cleanup_expired(&self) -> (usize, usize) {
        let now = self.clock.now_ms();
        let memory = self.store.write().await.cleanup_expired(now).len();
        let mirrored = match self.mirror.purge_expired(now).await {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "Mirror cleanup failed");
                0
            }
        };
        (memory, mirrored)
    }

    /// Actors that currently have entries in memory.
    pub async fn actors(&self) -> BTreeSet<String> {
        self.store.read().await.actors()
    }

    pub async fn keys_for_actor(&self, actor_id: &str) -> Vec<String> {
        self.store.read().await.keys_for_actor(actor_id)
    }

    /// Keys of an actor's entries that carry no context; snapshots only
    /// describe these.
    pub async fn unscoped_keys_for_actor(&self, actor_id: &str) -> Vec<String> {
        self.store.read().await.unscoped_keys_for_actor(actor_id)
    }

    // == Stats ==
    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.store.read().await.peek(key).is_some()
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.config.eviction_policy
    }

    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    pub fn is_memory_only(&self) -> bool {
        self.memory_only.load(Ordering::SeqCst)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn events(&self) -> &EventEmitter<CacheEvent> {
        &self.events
    }
}
