//! Cache Entry Module
//!
//! Defines individual permission cache entries, their priority and
//! resource class, and how cache keys are derived from a check request.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ports::CheckRequest;

// == Permission Value ==
/// A cached permission result: a plain verdict or the set of allowed actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionValue {
    Flag(bool),
    Actions(BTreeSet<String>),
}

impl PermissionValue {
    /// Resolves the value for a concrete action.
    pub fn allows(&self, action: &str) -> bool {
        match self {
            PermissionValue::Flag(allowed) => *allowed,
            PermissionValue::Actions(actions) => actions.contains(action),
        }
    }
}

impl From<bool> for PermissionValue {
    fn from(allowed: bool) -> Self {
        PermissionValue::Flag(allowed)
    }
}

// == Priority ==
/// Eviction priority. High-priority entries are never evicted automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

// == Resource Class ==
/// Expiry class derived from the resource name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    /// `role:*` resources, long-lived
    Role,
    /// `menu:*` resources, per-page navigation
    Menu,
    /// Everything else
    Permission,
}

impl ResourceClass {
    pub fn of(resource: &str) -> Self {
        if resource.starts_with("role:") {
            ResourceClass::Role
        } else if resource.starts_with("menu:") {
            ResourceClass::Menu
        } else {
            ResourceClass::Permission
        }
    }
}

// == Cache Key ==
/// Derives the cache key for a check request.
///
/// The key is a digest over actor, resource, action and the ordered context,
/// so two requests differing only in context never share an entry.
pub fn cache_key(request: &CheckRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.actor_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.resource.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.action.as_bytes());
    for (name, value) in &request.context {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format!("perm:{}", &digest[..32])
}

// == Entry Meta ==
/// Who and what an entry is about. Kept next to the value so invalidation
/// can match entries without reversing the key digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub actor_id: String,
    pub resource: String,
    /// Built from a request that carried context attributes
    #[serde(default)]
    pub scoped: bool,
}

impl EntryMeta {
    pub fn new(actor_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            resource: resource.into(),
            scoped: false,
        }
    }

    pub fn from_request(request: &CheckRequest) -> Self {
        Self {
            scoped: !request.context.is_empty(),
            ..Self::new(request.actor_id.clone(), request.resource.clone())
        }
    }

    pub fn class(&self) -> ResourceClass {
        ResourceClass::of(&self.resource)
    }
}

// == Cache Entry ==
/// A single cached permission result with access bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored value
    pub value: PermissionValue,
    pub meta: EntryMeta,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Last read or write (Unix milliseconds)
    pub last_access_at: u64,
    pub access_count: u64,
    pub priority: Priority,
    /// Exempt from eviction and always mirrored durably
    pub persistent: bool,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped at `now`.
    ///
    /// A zero TTL is treated as one millisecond so that `expires_at` always
    /// lies strictly after `created_at`.
    pub fn new(
        value: PermissionValue,
        meta: EntryMeta,
        now: u64,
        ttl_ms: Option<u64>,
        priority: Priority,
        persistent: bool,
    ) -> Self {
        let expires_at = ttl_ms.map(|ttl| now + ttl.max(1));

        Self {
            value,
            meta,
            created_at: now,
            last_access_at: now,
            access_count: 0,
            priority,
            persistent,
            expires_at,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now` is past its expiration time; at
    /// exactly `expires_at` it is still served.
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at {
            Some(expires) => now > expires,
            None => false,
        }
    }

    // == Touch ==
    /// Records a read access.
    pub fn touch(&mut self, now: u64) {
        self.last_access_at = now;
        self.access_count += 1;
    }

    /// Whether automatic eviction may remove this entry.
    pub fn is_evictable(&self) -> bool {
        self.priority != Priority::High && !self.persistent
    }

    /// Remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self, now: u64) -> Option<u64> {
        self.expires_at.map(|expires| expires.saturating_sub(now))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> EntryMeta {
        EntryMeta::new("u1", "orders")
    }

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new(true.into(), meta(), 1_000, None, Priority::Normal, false);

        assert_eq!(entry.value, PermissionValue::Flag(true));
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired(u64::MAX));
    }

    #[test]
    fn test_entry_expiration_boundary() {
        let entry = CacheEntry::new(true.into(), meta(), 1_000, Some(500), Priority::Normal, false);

        assert!(!entry.is_expired(1_499));
        assert!(!entry.is_expired(1_500));
        assert!(entry.is_expired(1_501));
        assert_eq!(entry.ttl_remaining_ms(1_200), Some(300));
        assert_eq!(entry.ttl_remaining_ms(2_000), Some(0));
    }

    #[test]
    fn test_zero_ttl_still_expires_after_creation() {
        let entry = CacheEntry::new(true.into(), meta(), 1_000, Some(0), Priority::Normal, false);
        assert!(entry.expires_at.unwrap() > entry.created_at);
    }

    #[test]
    fn test_touch_updates_bookkeeping() {
        let mut entry = CacheEntry::new(false.into(), meta(), 1_000, None, Priority::Low, false);
        entry.touch(1_250);
        entry.touch(1_300);

        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_access_at, 1_300);
    }

    #[test]
    fn test_evictable() {
        let high = CacheEntry::new(true.into(), meta(), 0, None, Priority::High, false);
        let pinned = CacheEntry::new(true.into(), meta(), 0, None, Priority::Normal, true);
        let normal = CacheEntry::new(true.into(), meta(), 0, None, Priority::Normal, false);

        assert!(!high.is_evictable());
        assert!(!pinned.is_evictable());
        assert!(normal.is_evictable());
    }

    #[test]
    fn test_resource_class() {
        assert_eq!(ResourceClass::of("role:admin"), ResourceClass::Role);
        assert_eq!(ResourceClass::of("menu:reports"), ResourceClass::Menu);
        assert_eq!(ResourceClass::of("orders"), ResourceClass::Permission);
    }

    #[test]
    fn test_cache_key_depends_on_context() {
        let plain = CheckRequest::new("u1", "orders", "read");
        let scoped = CheckRequest::new("u1", "orders", "read").with_context("tenant", "acme");

        assert_ne!(cache_key(&plain), cache_key(&scoped));
        assert_eq!(cache_key(&plain), cache_key(&plain.clone()));
        assert!(cache_key(&plain).starts_with("perm:"));
        assert!(!EntryMeta::from_request(&plain).scoped);
        assert!(EntryMeta::from_request(&scoped).scoped);
    }

    #[test]
    fn test_permission_value_actions() {
        let value: PermissionValue = serde_json::from_str(r#"["read","write"]"#).unwrap();
        assert!(value.allows("read"));
        assert!(!value.allows("delete"));

        let flag: PermissionValue = serde_json::from_str("false").unwrap();
        assert!(!flag.allows("read"));
    }
}
