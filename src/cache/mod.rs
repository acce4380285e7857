//! Cache Module
//!
//! Permission cache: in-memory entries with per-class TTL and policy-driven
//! eviction, backed by a durable mirror for offline reads.

mod entry;
pub mod eviction;
mod manager;
pub mod mirror;
mod stats;
pub mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use entry::{cache_key, CacheEntry, EntryMeta, PermissionValue, Priority, ResourceClass};
pub use eviction::EvictionPolicy;
pub use manager::{CacheManager, GetOptions, Invalidation, SetOptions, WriteTicket};
pub use mirror::{PersistentMirror, PersistentRecord};
pub use stats::CacheStats;
pub use store::EntryStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

// == Cache Events ==
/// Notifications emitted by the [`CacheManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// A value was written for `key`
    Updated { key: String },
    /// An invalidation removed `removed` in-memory entries
    Invalidated { target: Invalidation, removed: usize },
    /// An eviction pass removed `count` entries
    Evicted { count: usize },
}
