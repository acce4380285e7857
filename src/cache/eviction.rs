//! Eviction Policy Module
//!
//! Pure selection logic: given the entries currently held, decide which keys
//! an eviction pass removes. Nothing here mutates the store.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, Priority};

/// Share of the evictable candidates removed by one pass.
pub const EVICTION_FRACTION: f64 = 0.2;

// == Eviction Policy ==
/// Ordering used to pick eviction victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Least frequently accessed first, ties broken by recency
    Lfu,
    /// Lowest priority first, ties broken by recency
    Priority,
}

impl EvictionPolicy {
    /// Compares two candidates; `Less` means `a` is evicted before `b`.
    pub fn compare(&self, a: &CacheEntry, b: &CacheEntry) -> Ordering {
        match self {
            EvictionPolicy::Lru => a.last_access_at.cmp(&b.last_access_at),
            EvictionPolicy::Lfu => a
                .access_count
                .cmp(&b.access_count)
                .then(a.last_access_at.cmp(&b.last_access_at)),
            EvictionPolicy::Priority => priority_rank(a.priority)
                .cmp(&priority_rank(b.priority))
                .then(a.last_access_at.cmp(&b.last_access_at)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Priority => "priority",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "priority" => Ok(EvictionPolicy::Priority),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}

fn priority_rank(priority: Priority) -> u8 {
    match priority {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
    }
}

// == Victim Selection ==
/// Picks the keys one eviction pass removes.
///
/// Only entries that are neither high priority nor persistent are candidates.
/// The front 20% of candidates under `policy` is returned, at least one key
/// whenever a candidate exists. Uses partial selection so the work stays
/// linear in the number of candidates.
pub fn select_victims<'a, I>(entries: I, policy: EvictionPolicy) -> Vec<String>
where
    I: IntoIterator<Item = (&'a String, &'a CacheEntry)>,
{
    let mut candidates: Vec<(&String, &CacheEntry)> = entries
        .into_iter()
        .filter(|(_, entry)| entry.is_evictable())
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    let count = victim_count(candidates.len());
    if count < candidates.len() {
        candidates.select_nth_unstable_by(count - 1, |a, b| policy.compare(a.1, b.1));
        candidates.truncate(count);
    }
    candidates.sort_by(|a, b| policy.compare(a.1, b.1));

    candidates.into_iter().map(|(key, _)| key.clone()).collect()
}

/// Number of victims for a candidate pool of `candidates` entries.
pub fn victim_count(candidates: usize) -> usize {
    if candidates == 0 {
        return 0;
    }
    ((candidates as f64 * EVICTION_FRACTION).ceil() as usize).clamp(1, candidates)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryMeta;
    use std::collections::HashMap;

    fn entry(last_access: u64, count: u64, priority: Priority, persistent: bool) -> CacheEntry {
        let mut entry = CacheEntry::new(
            true.into(),
            EntryMeta::new("u1", "orders"),
            0,
            None,
            priority,
            persistent,
        );
        entry.last_access_at = last_access;
        entry.access_count = count;
        entry
    }

    #[test]
    fn test_victim_count() {
        assert_eq!(victim_count(0), 0);
        assert_eq!(victim_count(1), 1);
        assert_eq!(victim_count(5), 1);
        assert_eq!(victim_count(10), 2);
        assert_eq!(victim_count(11), 3);
    }

    #[test]
    fn test_lru_selects_oldest_access() {
        let mut entries = HashMap::new();
        for i in 0..10u64 {
            entries.insert(format!("k{}", i), entry(100 - i, 0, Priority::Normal, false));
        }

        let victims = select_victims(&entries, EvictionPolicy::Lru);
        assert_eq!(victims, vec!["k9".to_string(), "k8".to_string()]);
    }

    #[test]
    fn test_lfu_selects_least_used() {
        let mut entries = HashMap::new();
        entries.insert("busy".to_string(), entry(1, 50, Priority::Normal, false));
        entries.insert("idle".to_string(), entry(9, 1, Priority::Normal, false));
        entries.insert("warm".to_string(), entry(5, 10, Priority::Normal, false));

        let victims = select_victims(&entries, EvictionPolicy::Lfu);
        assert_eq!(victims, vec!["idle".to_string()]);
    }

    #[test]
    fn test_priority_selects_low_before_normal() {
        let mut entries = HashMap::new();
        entries.insert("normal_old".to_string(), entry(1, 0, Priority::Normal, false));
        entries.insert("low_new".to_string(), entry(99, 0, Priority::Low, false));

        let victims = select_victims(&entries, EvictionPolicy::Priority);
        assert_eq!(victims, vec!["low_new".to_string()]);
    }

    #[test]
    fn test_exempt_entries_never_selected() {
        let mut entries = HashMap::new();
        entries.insert("high".to_string(), entry(0, 0, Priority::High, false));
        entries.insert("pinned".to_string(), entry(0, 0, Priority::Low, true));

        assert!(select_victims(&entries, EvictionPolicy::Lru).is_empty());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("LFU".parse::<EvictionPolicy>(), Ok(EvictionPolicy::Lfu));
        assert!("random".parse::<EvictionPolicy>().is_err());
    }
}
