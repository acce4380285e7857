//! Entry Store Module
//!
//! In-memory map of permission entries with TTL handling and policy-driven
//! eviction. Purely synchronous; the cache manager wraps it in a lock and
//! pairs it with the durable mirror.

use std::collections::{BTreeSet, HashMap};

use crate::cache::eviction::{select_victims, EvictionPolicy};
use crate::cache::{CacheEntry, CacheStats, PermissionValue, MAX_KEY_LENGTH};
use crate::error::{CacheError, Result};

/// Fill ratio at which an eviction pass runs before admitting a new key.
pub const EVICTION_THRESHOLD: f64 = 0.8;

// == Lookup ==
/// Result of reading one key from memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(PermissionValue),
    /// The entry existed but its TTL had elapsed; it has been purged
    Expired,
    Missing,
}

// == Entry Store ==
#[derive(Debug)]
pub struct EntryStore {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    max_entries: usize,
    policy: EvictionPolicy,
}

impl EntryStore {
    // == Constructor ==
    /// Creates an empty store holding at most `max_entries` entries.
    pub fn new(max_entries: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
            policy,
        }
    }

    // == Get ==
    /// Reads a key, updating access bookkeeping on a hit.
    ///
    /// Expired entries are removed on the spot. Only hits are counted here;
    /// the caller decides whether an expired or missing key ends up as a miss
    /// or as a mirror hit.
    pub fn get(&mut self, key: &str, now: u64) -> Lookup {
        let expired = match self.entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.touch(now);
                let value = entry.value.clone();
                self.stats.record_hit();
                return Lookup::Hit(value);
            }
            None => return Lookup::Missing,
        };

        if expired {
            self.entries.remove(key);
            self.stats.set_total_entries(self.entries.len());
        }
        Lookup::Expired
    }

    /// Returns the entry without touching bookkeeping or expiry.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Insert ==
    /// Stores an entry, overwriting any previous value for the key.
    ///
    /// When the store has reached the eviction threshold a pass runs before a
    /// new key is admitted. Returns the evicted keys. Fails with `CacheFull`
    /// only when every resident entry is exempt from eviction.
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Result<Vec<String>> {
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key must be 1..={} bytes",
                MAX_KEY_LENGTH
            )));
        }

        let mut evicted = Vec::new();
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.eviction_threshold() {
                evicted.extend(self.evict_pass());
            }
            if self.entries.len() >= self.max_entries {
                evicted.extend(self.evict_pass());
                if self.entries.len() >= self.max_entries {
                    return Err(CacheError::CacheFull(format!(
                        "all {} entries are exempt from eviction",
                        self.entries.len()
                    )));
                }
            }
        }

        self.entries.insert(key, entry);
        self.stats.set_total_entries(self.entries.len());
        Ok(evicted)
    }

    // == Eviction Pass ==
    /// Removes the front share of evictable entries under the active policy.
    pub fn evict_pass(&mut self) -> Vec<String> {
        let victims = select_victims(&self.entries, self.policy);
        for key in &victims {
            self.entries.remove(key);
        }
        self.stats.record_evictions(victims.len());
        self.stats.set_total_entries(self.entries.len());
        victims
    }

    /// Eviction pass that never picks `keep`.
    pub fn evict_pass_sparing(&mut self, keep: &str) -> Vec<String> {
        let kept = self.entries.remove_entry(keep);
        let victims = self.evict_pass();
        if let Some((key, entry)) = kept {
            self.entries.insert(key, entry);
            self.stats.set_total_entries(self.entries.len());
        }
        victims
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        self.stats.set_total_entries(self.entries.len());
        removed
    }

    /// Removes every entry matching `pred` and returns their keys.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<String>
    where
        F: FnMut(&str, &CacheEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| pred(key, entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.entries.remove(key);
        }
        self.stats.set_total_entries(self.entries.len());
        keys
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning their keys.
    pub fn cleanup_expired(&mut self, now: u64) -> Vec<String> {
        self.remove_where(|_, entry| entry.is_expired(now))
    }

    /// Distinct actors that currently have entries.
    pub fn actors(&self) -> BTreeSet<String> {
        self.entries
            .values()
            .map(|entry| entry.meta.actor_id.clone())
            .collect()
    }

    /// Keys of every entry belonging to `actor_id`.
    pub fn keys_for_actor(&self, actor_id: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.meta.actor_id == actor_id)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys of `actor_id`'s entries cached without context attributes.
    pub fn unscoped_keys_for_actor(&self, actor_id: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.meta.actor_id == actor_id && !entry.meta.scoped)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats.set_total_entries(0);
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn record_miss(&mut self) {
        self.stats.record_miss();
    }

    pub fn record_offline_hit(&mut self) {
        self.stats.record_offline_hit();
    }

    pub fn set_memory_only(&mut self) {
        self.stats.memory_only = true;
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn eviction_threshold(&self) -> usize {
        ((self.max_entries as f64 * EVICTION_THRESHOLD) as usize).max(1)
    }
}
