//! Background Tasks Module
//!
//! Contains background tasks that run during service operation.
//!
//! # Tasks
//! - TTL Cleanup: removes expired entries at configured intervals
//! - Reconciliation: merges origin snapshots into the cache
//! - Recovery probe: leaves offline mode once the origin is healthy
//! - Network watcher: reacts to connectivity changes

mod cleanup;
mod reconcile;
mod recovery;

pub use cleanup::spawn_cleanup_task;
pub use reconcile::{reconcile_once, spawn_reconcile_task, ReconcileReport};
pub use recovery::{spawn_network_watcher, spawn_recovery_task};
