//! Live sync channel
//!
//! Keeps one authenticated push connection open and applies server changes to
//! the cache. A single driver task owns the connection; it reconnects with
//! jittered exponential backoff and goes idle once the attempt budget is spent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, Invalidation, ResourceClass};
use crate::config::SyncConfig;
use crate::events::EventEmitter;
use crate::ports::{CheckRequest, Clock, LiveTransport, NetworkStatus, TransportConnection};
use crate::sync::message::{ClientFrame, ServerFrame, SyncKind, SyncMessage};
use crate::sync::{ConnectionState, SyncEvent};

/// Result of applying one [`SyncMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The cache was updated
    Applied,
    /// Not newer than the last message seen for its sync key, or for a
    /// broader key covering it
    Stale,
    /// Heartbeat; only liveness was recorded
    Liveness,
}

struct Inner {
    config: SyncConfig,
    cache: Arc<CacheManager>,
    transport: Arc<dyn LiveTransport>,
    network: Arc<dyn NetworkStatus>,
    clock: Arc<dyn Clock>,
    state: watch::Sender<ConnectionState>,
    /// Last applied server timestamp per sync key
    last_synced: Mutex<HashMap<String, u64>>,
    last_heartbeat_at: AtomicU64,
    wake: Notify,
    events: EventEmitter<SyncEvent>,
}

// == Sync Channel ==
pub struct SyncChannel {
    inner: Arc<Inner>,
    driver: StdMutex<Option<JoinHandle<()>>>,
}

impl SyncChannel {
    pub fn new(
        config: SyncConfig,
        cache: Arc<CacheManager>,
        transport: Arc<dyn LiveTransport>,
        network: Arc<dyn NetworkStatus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                transport,
                network,
                clock,
                state,
                last_synced: Mutex::new(HashMap::new()),
                last_heartbeat_at: AtomicU64::new(0),
                wake: Notify::new(),
                events: EventEmitter::new(),
            }),
            driver: StdMutex::new(None),
        }
    }

    // == Lifecycle ==
    /// Starts (or restarts) the connection driver. Any previous driver and
    /// its pending reconnect are aborted first.
    pub fn connect(&self) {
        let Some(url) = self.inner.config.url.clone() else {
            info!("No sync URL configured, live channel disabled");
            return;
        };

        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = driver.take() {
            previous.abort();
            self.inner.set_state(ConnectionState::Disconnected);
        }
        let inner = Arc::clone(&self.inner);
        *driver = Some(tokio::spawn(inner.drive(url)));
    }

    /// Stops the driver and drops the connection.
    pub fn disconnect(&self) {
        let previous = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = previous {
            driver.abort();
            info!("Live channel stopped");
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Ends an idle period: an exhausted or offline-waiting driver tries again.
    pub fn wake(&self) {
        self.inner.wake.notify_one();
    }

    // == State ==
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// True only once the server has acknowledged authentication.
    pub fn is_healthy(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Clock time of the last heartbeat or pong, 0 if none yet.
    pub fn last_heartbeat_at(&self) -> u64 {
        self.inner.last_heartbeat_at.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> &EventEmitter<SyncEvent> {
        &self.inner.events
    }

    /// Applies one change notification, last-write-wins per sync key.
    pub async fn apply_message(&self, message: &SyncMessage) -> ApplyOutcome {
        self.inner.apply(message).await
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        if let Some(driver) = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            driver.abort();
        }
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = ?next, "Live channel state changed");
            self.events.emit(&SyncEvent::StateChanged(next));
        }
    }

    // == Driver ==
    async fn drive(self: Arc<Self>, url: String) {
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempt: u32 = 0;

        loop {
            if !self.network.is_online() {
                debug!("Network offline, live channel waiting");
                self.wake.notified().await;
                continue;
            }

            self.set_state(ConnectionState::Connecting);
            let authenticated =
                match timeout(self.config.connect_timeout, self.transport.connect(&url)).await {
                    Ok(Ok(connection)) => {
                        self.set_state(ConnectionState::Connected);
                        self.session(connection).await
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, attempt, "Live channel connect failed");
                        false
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = self.config.connect_timeout.as_millis() as u64,
                            "Live channel connect timed out"
                        );
                        false
                    }
                };
            self.set_state(ConnectionState::Disconnected);

            if authenticated {
                attempt = 0;
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, "Reconnect attempts exhausted, live channel idle");
                self.events
                    .emit(&SyncEvent::ReconnectExhausted { attempts: attempt });
                self.wake.notified().await;
                attempt = 0;
                continue;
            }

            let delay = self.config.backoff.delay(attempt);
            attempt += 1;
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting live channel");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        }
    }

    /// Runs one connection until it closes. Returns whether it authenticated.
    async fn session(&self, mut connection: Box<dyn TransportConnection>) -> bool {
        let auth = ClientFrame::Auth {
            token: self.config.token.clone(),
        };
        if let Err(err) = connection.send(auth.to_text()).await {
            warn!(error = %err, "Sending auth frame failed");
            connection.close().await;
            return false;
        }

        let mut authenticated = false;
        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        let handshake = sleep(self.config.connect_timeout);
        tokio::pin!(handshake);

        loop {
            tokio::select! {
                frame = connection.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text, &mut authenticated).await,
                    Some(Err(err)) => {
                        warn!(error = %err, "Live channel receive failed");
                        break;
                    }
                    None => {
                        info!("Live channel closed by server");
                        break;
                    }
                },
                _ = heartbeat.tick(), if authenticated => {
                    let ping = ClientFrame::Ping { timestamp: self.clock.now_ms() };
                    if let Err(err) = connection.send(ping.to_text()).await {
                        warn!(error = %err, "Heartbeat send failed");
                        break;
                    }
                }
                _ = &mut handshake, if !authenticated => {
                    warn!("Server did not acknowledge authentication in time");
                    break;
                }
            }
        }

        connection.close().await;
        authenticated
    }

    async fn handle_frame(&self, text: &str, authenticated: &mut bool) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Ignoring undecodable sync frame");
                return;
            }
        };

        match frame {
            ServerFrame::AuthAck => {
                *authenticated = true;
                self.set_state(ConnectionState::Authenticated);
                info!("Live channel authenticated");
            }
            ServerFrame::Pong => {
                self.last_heartbeat_at
                    .store(self.clock.now_ms(), Ordering::SeqCst);
            }
            ServerFrame::Update(message) if *authenticated => {
                self.apply(&message).await;
            }
            ServerFrame::Update(message) => {
                debug!(kind = message.kind.as_str(), "Dropping update received before auth_ack");
            }
        }
    }

    // == Apply ==
    async fn apply(&self, message: &SyncMessage) -> ApplyOutcome {
        let Some(sync_key) = message.sync_key() else {
            self.last_heartbeat_at
                .store(self.clock.now_ms(), Ordering::SeqCst);
            return ApplyOutcome::Liveness;
        };

        // Held across the cache update so two messages for one key land in timestamp order.
        let mut last_synced = self.last_synced.lock().await;
        let covering = message.covering_keys();
        let watermark = std::iter::once(&sync_key)
            .chain(&covering)
            .filter_map(|key| last_synced.get(key).copied())
            .max();
        if let Some(seen) = watermark {
            if message.server_timestamp <= seen {
                debug!(
                    sync_key = %sync_key,
                    timestamp = message.server_timestamp,
                    seen,
                    "Skipping stale sync message"
                );
                return ApplyOutcome::Stale;
            }
        }
        last_synced.insert(sync_key, message.server_timestamp);

        let actor_id = message.actor_id.clone();
        match message.kind {
            SyncKind::RoleChanged => {
                self.cache.invalidate(Invalidation::Actor(actor_id.clone())).await;
            }
            SyncKind::MenuChanged => {
                self.cache
                    .invalidate(Invalidation::ActorClass {
                        actor_id: actor_id.clone(),
                        class: ResourceClass::Menu,
                    })
                    .await;
            }
            SyncKind::PermissionChanged => {
                self.apply_permission_change(message).await;
            }
            SyncKind::Heartbeat => {}
        }
        drop(last_synced);

        self.events.emit(&SyncEvent::MessageApplied {
            kind: message.kind,
            actor_id,
        });
        ApplyOutcome::Applied
    }

    async fn apply_permission_change(&self, message: &SyncMessage) {
        let actor_id = message.actor_id.clone();
        self.cache.mark_actor_changed(&actor_id);
        match (message.resource(), message.action(), message.allowed()) {
            (Some(resource), Some(action), Some(allowed)) => {
                let request = CheckRequest {
                    actor_id,
                    resource: resource.to_string(),
                    action: action.to_string(),
                    context: message.context(),
                };
                if let Err(err) = self.cache.store_decision(&request, allowed).await {
                    warn!(error = %err, "Pushed permission not cached, purging resource instead");
                    self.cache
                        .invalidate(Invalidation::ActorResource {
                            actor_id: request.actor_id,
                            resource: request.resource,
                        })
                        .await;
                }
            }
            (Some(resource), _, _) => {
                self.cache
                    .invalidate(Invalidation::ActorResource {
                        actor_id,
                        resource: resource.to_string(),
                    })
                    .await;
            }
            (None, _, _) => {
                self.cache
                    .invalidate(Invalidation::ActorClass {
                        actor_id,
                        class: ResourceClass::Permission,
                    })
                    .await;
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        ChannelTransport, ManualClock, MemoryDurableStore, PeerConnection, WatchNetworkStatus,
    };
    use crate::backoff::BackoffConfig;
    use crate::cache::{GetOptions, PermissionValue};
    use crate::config::CacheConfig;
    use crate::events::Subscription;
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        channel: SyncChannel,
        cache: Arc<CacheManager>,
        transport: Arc<ChannelTransport>,
        accept: mpsc::UnboundedReceiver<PeerConnection>,
        network: Arc<WatchNetworkStatus>,
    }

    fn sync_config() -> SyncConfig {
        SyncConfig {
            url: Some("ws://sync.test/live".to_string()),
            token: "t0k".to_string(),
            backoff: BackoffConfig {
                base: Duration::from_millis(5),
                max: Duration::from_millis(20),
                multiplier: 2.0,
                jitter: Duration::ZERO,
            },
            max_reconnect_attempts: 3,
            connect_timeout: Duration::from_millis(200),
            heartbeat_interval: Duration::from_millis(50),
            reconcile_interval: Duration::from_secs(300),
        }
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = Arc::new(CacheManager::new(
            CacheConfig::default(),
            Arc::new(MemoryDurableStore::new()),
            clock.clone(),
        ));
        let (transport, accept) = ChannelTransport::new();
        let transport = Arc::new(transport);
        let network = Arc::new(WatchNetworkStatus::new(true));
        let channel = SyncChannel::new(
            config,
            cache.clone(),
            transport.clone(),
            network.clone(),
            clock,
        );
        Fixture {
            channel,
            cache,
            transport,
            accept,
            network,
        }
    }

    fn collect_events(channel: &SyncChannel) -> (Subscription, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = channel.events().add_listener(move |event: &SyncEvent| {
            tx.send(event.clone())?;
            Ok(())
        });
        (subscription, rx)
    }

    async fn authenticate(f: &mut Fixture) -> PeerConnection {
        f.channel.connect();
        let mut peer = timeout(WAIT, f.accept.recv()).await.unwrap().unwrap();
        let auth = timeout(WAIT, peer.from_client.recv()).await.unwrap().unwrap();
        assert_eq!(auth, r#"{"type":"auth","token":"t0k"}"#);
        assert!(!f.channel.is_healthy(), "connected is not yet healthy");

        peer.to_client.send(r#"{"type":"auth_ack"}"#.to_string()).unwrap();
        let mut states = f.channel.subscribe_state();
        timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Authenticated))
            .await
            .unwrap()
            .unwrap();
        peer
    }

    async fn seed(cache: &CacheManager, actor: &str, resource: &str) -> String {
        let request = CheckRequest::new(actor, resource, "read");
        cache.store_decision(&request, true).await.unwrap();
        crate::cache::cache_key(&request)
    }

    #[tokio::test]
    async fn test_healthy_only_after_auth_ack() {
        let mut f = fixture(sync_config());
        let _peer = authenticate(&mut f).await;
        assert!(f.channel.is_healthy());
        f.channel.disconnect();
        assert_eq!(f.channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_pushed_role_change_purges_actor() {
        let mut f = fixture(sync_config());
        seed(&f.cache, "u1", "orders").await;
        seed(&f.cache, "u1", "menu:reports").await;
        let kept = seed(&f.cache, "u2", "orders").await;
        let (_sub, mut events) = collect_events(&f.channel);

        let peer = authenticate(&mut f).await;
        peer.to_client
            .send(r#"{"type":"role_changed","actor_id":"u1","server_timestamp":10}"#.to_string())
            .unwrap();

        loop {
            match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
                SyncEvent::MessageApplied { kind, .. } => {
                    assert_eq!(kind, SyncKind::RoleChanged);
                    break;
                }
                _ => continue,
            }
        }
        assert!(f.cache.keys_for_actor("u1").await.is_empty());
        assert!(f.cache.contains(&kept).await);
    }

    #[tokio::test]
    async fn test_heartbeat_ping_sent_when_authenticated() {
        let mut f = fixture(sync_config());
        let mut peer = authenticate(&mut f).await;

        let ping = timeout(WAIT, peer.from_client.recv()).await.unwrap().unwrap();
        assert!(ping.starts_with(r#"{"type":"ping""#), "got {ping}");
    }

    #[tokio::test]
    async fn test_reconnect_attempts_are_bounded() {
        let f = fixture(sync_config());
        let (_sub, mut events) = collect_events(&f.channel);
        f.transport.refuse_connections(true);

        f.channel.connect();
        loop {
            if let SyncEvent::ReconnectExhausted { attempts } =
                timeout(WAIT, events.recv()).await.unwrap().unwrap()
            {
                assert_eq!(attempts, 3);
                break;
            }
        }
        assert_eq!(f.transport.connects(), 4);

        // Idle until woken.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.transport.connects(), 4);
        f.transport.refuse_connections(false);
        f.channel.wake();

        let mut accept = f.accept;
        assert!(timeout(WAIT, accept.recv()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stalled_connect_is_abandoned() {
        let mut config = sync_config();
        config.connect_timeout = Duration::from_millis(30);
        config.max_reconnect_attempts = 1;
        let f = fixture(config);
        let (_sub, mut events) = collect_events(&f.channel);
        f.transport.stall_connections(true);

        f.channel.connect();
        loop {
            if let SyncEvent::ReconnectExhausted { .. } =
                timeout(WAIT, events.recv()).await.unwrap().unwrap()
            {
                break;
            }
        }
        assert_eq!(f.transport.connects(), 2);
        assert_eq!(f.channel.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_auth_ack_drops_connection() {
        let mut config = sync_config();
        config.connect_timeout = Duration::from_millis(30);
        let mut f = fixture(config);

        f.channel.connect();
        let mut first = timeout(WAIT, f.accept.recv()).await.unwrap().unwrap();
        first.from_client.recv().await.unwrap();

        // The client gives up on the silent peer and reconnects.
        assert_eq!(timeout(WAIT, first.from_client.recv()).await.unwrap(), None);
        assert!(timeout(WAIT, f.accept.recv()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_connect_replaces_previous_driver() {
        let mut f = fixture(sync_config());

        f.channel.connect();
        let mut first = timeout(WAIT, f.accept.recv()).await.unwrap().unwrap();
        first.from_client.recv().await.unwrap();

        f.channel.connect();
        let _second = timeout(WAIT, f.accept.recv()).await.unwrap().unwrap();

        assert_eq!(timeout(WAIT, first.from_client.recv()).await.unwrap(), None);
        assert_eq!(f.transport.connects(), 2);
    }

    #[tokio::test]
    async fn test_offline_network_defers_connect() {
        let mut f = fixture(sync_config());
        f.network.set_online(false);

        f.channel.connect();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(f.transport.connects(), 0);

        f.network.set_online(true);
        f.channel.wake();
        assert!(timeout(WAIT, f.accept.recv()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_is_last_write_wins() {
        let f = fixture(sync_config());
        let role = SyncMessage::new(SyncKind::RoleChanged, "u1", 10);

        assert_eq!(f.channel.apply_message(&role).await, ApplyOutcome::Applied);
        assert_eq!(f.channel.apply_message(&role).await, ApplyOutcome::Stale);

        let older = SyncMessage::new(SyncKind::RoleChanged, "u1", 5);
        assert_eq!(f.channel.apply_message(&older).await, ApplyOutcome::Stale);

        // Unrelated sync keys keep their own ordering.
        let other = SyncMessage::new(SyncKind::MenuChanged, "u2", 5);
        assert_eq!(f.channel.apply_message(&other).await, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_role_change_supersedes_older_pushes_for_actor() {
        let f = fixture(sync_config());
        let role = SyncMessage::new(SyncKind::RoleChanged, "u1", 100);
        assert_eq!(f.channel.apply_message(&role).await, ApplyOutcome::Applied);

        let grant = SyncMessage::new(SyncKind::PermissionChanged, "u1", 50).with_payload(
            json!({"resource": "orders", "action": "read", "allowed": true}),
        );
        assert_eq!(f.channel.apply_message(&grant).await, ApplyOutcome::Stale);
        assert!(f.cache.keys_for_actor("u1").await.is_empty());

        let menu = SyncMessage::new(SyncKind::MenuChanged, "u1", 100);
        assert_eq!(f.channel.apply_message(&menu).await, ApplyOutcome::Stale);

        let newer = SyncMessage::new(SyncKind::PermissionChanged, "u1", 150).with_payload(
            json!({"resource": "orders", "action": "read", "allowed": true}),
        );
        assert_eq!(f.channel.apply_message(&newer).await, ApplyOutcome::Applied);
        assert_eq!(f.cache.keys_for_actor("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_actor_wide_permission_change_supersedes_older_resource_push() {
        let f = fixture(sync_config());
        let purge = SyncMessage::new(SyncKind::PermissionChanged, "u1", 20);
        assert_eq!(f.channel.apply_message(&purge).await, ApplyOutcome::Applied);

        let older = SyncMessage::new(SyncKind::PermissionChanged, "u1", 10)
            .with_payload(json!({"resource": "orders", "action": "read", "allowed": true}));
        assert_eq!(f.channel.apply_message(&older).await, ApplyOutcome::Stale);
    }

    #[tokio::test]
    async fn test_permission_change_with_verdict_overwrites_entry() {
        let f = fixture(sync_config());
        let key = seed(&f.cache, "u1", "orders").await;

        let message = SyncMessage::new(SyncKind::PermissionChanged, "u1", 10).with_payload(
            json!({"resource": "orders", "action": "read", "allowed": false}),
        );
        f.channel.apply_message(&message).await;

        assert_eq!(
            f.cache.get(&key, GetOptions::memory_only()).await,
            Some(PermissionValue::Flag(false))
        );
    }

    #[tokio::test]
    async fn test_permission_change_without_verdict_purges_resource() {
        let f = fixture(sync_config());
        let orders = seed(&f.cache, "u1", "orders").await;
        let invoices = seed(&f.cache, "u1", "invoices").await;

        let message = SyncMessage::new(SyncKind::PermissionChanged, "u1", 10)
            .with_payload(json!({"resource": "orders"}));
        f.channel.apply_message(&message).await;

        assert!(!f.cache.contains(&orders).await);
        assert!(f.cache.contains(&invoices).await);
    }

    #[tokio::test]
    async fn test_menu_change_purges_menu_entries_only() {
        let f = fixture(sync_config());
        let menu = seed(&f.cache, "u1", "menu:reports").await;
        let orders = seed(&f.cache, "u1", "orders").await;

        f.channel
            .apply_message(&SyncMessage::new(SyncKind::MenuChanged, "u1", 1))
            .await;

        assert!(!f.cache.contains(&menu).await);
        assert!(f.cache.contains(&orders).await);
    }

    #[tokio::test]
    async fn test_heartbeat_records_liveness() {
        let f = fixture(sync_config());
        let outcome = f
            .channel
            .apply_message(&SyncMessage::new(SyncKind::Heartbeat, "", 1))
            .await;
        assert_eq!(outcome, ApplyOutcome::Liveness);
        assert_eq!(f.channel.last_heartbeat_at(), 1_000_000);
    }

    fn arb_message() -> impl Strategy<Value = SyncMessage> {
        (0usize..3, 0usize..3, 0usize..3, 1u64..50).prop_map(|(kind, actor, resource, ts)| {
            let kind = [
                SyncKind::RoleChanged,
                SyncKind::MenuChanged,
                SyncKind::PermissionChanged,
            ][kind];
            SyncMessage::new(kind, format!("u{actor}"), ts)
                .with_payload(json!({"resource": format!("r{resource}")}))
        })
    }

    proptest! {
        #[test]
        fn prop_reapplying_messages_is_a_no_op(messages in prop::collection::vec(arb_message(), 1..30)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let f = fixture(sync_config());
                for message in &messages {
                    f.channel.apply_message(message).await;
                }
                for resource in ["r0", "r1", "r2"] {
                    seed(&f.cache, "u0", resource).await;
                }
                let before = f.cache.len().await;

                for message in &messages {
                    prop_assert_eq!(f.channel.apply_message(message).await, ApplyOutcome::Stale);
                }
                prop_assert_eq!(f.cache.len().await, before);
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
