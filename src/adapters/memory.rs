//! In-process adapters
//!
//! Port implementations that keep everything in memory: a durable store with
//! an optional byte quota, clocks, a watch-backed network status, a scriptable
//! origin and a channel-backed live transport. They back embedded setups and
//! the test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::error::{OriginError, StorageError, TransportError};
use crate::ports::{
    CheckRequest, Clock, DurableStore, LiveTransport, NetworkStatus, OriginService,
    PermissionSnapshot, SnapshotGrant, TransportConnection,
};

// == Memory Durable Store ==
/// HashMap-backed store. With a quota, writes that would push the total
/// stored bytes (keys plus values) past it fail with `QuotaExceeded`.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    data: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            quota: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn used_bytes(data: &HashMap<String, String>) -> usize {
        data.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(quota) = self.quota {
            let current = Self::used_bytes(&data);
            let replaced = data.get(key).map(|old| key.len() + old.len()).unwrap_or(0);
            if current - replaced + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// == Clocks ==
/// Wall clock backed by chrono.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// == Network Status ==
/// Network status driven through a tokio watch channel.
#[derive(Debug)]
pub struct WatchNetworkStatus {
    tx: watch::Sender<bool>,
}

impl WatchNetworkStatus {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

impl NetworkStatus for WatchNetworkStatus {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

// == Memory Origin ==
/// Grant table standing in for the origin service, with failure injection.
#[derive(Debug, Default)]
pub struct MemoryOrigin {
    grants: Mutex<HashMap<(String, String, String), bool>>,
    scripted_failures: Mutex<VecDeque<OriginError>>,
    persistent_failure: Mutex<Option<OriginError>>,
    unhealthy: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MemoryOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor_id: &str, resource: &str, action: &str, allowed: bool) {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (actor_id.to_string(), resource.to_string(), action.to_string()),
                allowed,
            );
    }

    pub fn revoke_all(&self, actor_id: &str) {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(actor, _, _), _| actor != actor_id);
    }

    /// The next `check` calls fail with these errors, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = OriginError>) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(errors);
    }

    /// Every `check` fails with `error` until cleared with `None`.
    pub fn fail_always(&self, error: Option<OriginError>) {
        *self
            .persistent_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    /// Delays every `check` answer, to exercise call deadlines.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of `check` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<OriginError> {
        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.or_else(|| {
            self.persistent_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}

#[async_trait]
impl OriginService for MemoryOrigin {
    async fn check(&self, request: &CheckRequest) -> Result<bool, OriginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.next_failure() {
            return Err(error);
        }
        let grants = self.grants.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(grants
            .get(&(
                request.actor_id.clone(),
                request.resource.clone(),
                request.action.clone(),
            ))
            .copied()
            .unwrap_or(false))
    }

    async fn snapshot(&self, actor_id: &str) -> Result<PermissionSnapshot, OriginError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(OriginError::Network("origin unavailable".to_string()));
        }
        let grants = self
            .grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((actor, _, _), _)| actor == actor_id)
            .map(|((_, resource, action), allowed)| SnapshotGrant {
                resource: resource.clone(),
                action: action.clone(),
                allowed: *allowed,
            })
            .collect();
        Ok(PermissionSnapshot {
            actor_id: actor_id.to_string(),
            server_timestamp: SystemClock.now_ms(),
            grants,
        })
    }

    async fn health_check(&self) -> Result<(), OriginError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(OriginError::Network("origin unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

// == Channel Transport ==
/// Server side of one in-process connection.
#[derive(Debug)]
pub struct PeerConnection {
    /// Frames sent by the client
    pub from_client: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the client; dropping it closes the connection
    pub to_client: mpsc::UnboundedSender<String>,
}

/// Live transport over tokio channels. Each accepted connection is handed to
/// the receiver returned by [`ChannelTransport::new`].
#[derive(Debug)]
pub struct ChannelTransport {
    accept_tx: mpsc::UnboundedSender<PeerConnection>,
    refuse: AtomicBool,
    stall: AtomicBool,
    connects: AtomicUsize,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerConnection>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                refuse: AtomicBool::new(false),
                stall: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
            },
            accept_rx,
        )
    }

    /// Makes every connect attempt fail immediately.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Makes every connect attempt hang forever.
    pub fn stall_connections(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Number of connect attempts made.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveTransport for ChannelTransport {
    async fn connect(&self, _url: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        self.accept_tx
            .send(PeerConnection {
                from_client,
                to_client,
            })
            .map_err(|_| TransportError::Connect("no listener".to_string()))?;

        Ok(Box::new(ChannelConnection {
            tx: client_tx,
            rx: client_rx,
        }))
    }
}

struct ChannelConnection {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl TransportConnection for ChannelConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}
