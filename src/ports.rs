//! Ports
//!
//! Interfaces to the collaborators the permission layer depends on but does
//! not own: the origin permission service, a durable key-value store, the live
//! push transport, the network status source and the clock. Concrete bindings
//! live in [`crate::adapters`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{OriginError, StorageError, TransportError};

// == Check Request ==
/// A single "can actor do action on resource" question.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRequest {
    pub actor_id: String,
    pub resource: String,
    pub action: String,
    /// Extra attributes the origin evaluates (tenant, page, ...)
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl CheckRequest {
    pub fn new(
        actor_id: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            resource: resource.into(),
            action: action.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

// == Snapshot ==
/// Authoritative grant list for one actor, used by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    pub actor_id: String,
    /// Server time the snapshot was taken (Unix milliseconds)
    pub server_timestamp: u64,
    pub grants: Vec<SnapshotGrant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotGrant {
    pub resource: String,
    pub action: String,
    pub allowed: bool,
}

// == Origin Service ==
/// The authoritative permission backend.
#[async_trait]
pub trait OriginService: Send + Sync {
    /// Evaluates a single permission check.
    async fn check(&self, request: &CheckRequest) -> Result<bool, OriginError>;

    /// Returns every grant currently held by the actor.
    async fn snapshot(&self, actor_id: &str) -> Result<PermissionSnapshot, OriginError>;

    /// Cheap liveness probe used to leave offline mode.
    async fn health_check(&self) -> Result<(), OriginError>;
}

// == Durable Store ==
/// String key-value storage that survives restarts.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// == Live Transport ==
/// Opens live push connections.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// One open push connection carrying text frames.
///
/// `recv` returning `None` means the peer closed the connection.
#[async_trait]
pub trait TransportConnection: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

// == Network Status ==
/// Reports whether the host currently has connectivity.
pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every online/offline transition.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

// == Clock ==
/// Wall-clock source in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}
