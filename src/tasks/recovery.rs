//! Offline recovery tasks
//!
//! The recovery probe polls origin health while offline, and probes early
//! when an origin call succeeds during offline mode. The network watcher forwards connectivity changes to
//! the coordinator and the live channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ports::NetworkStatus;
use crate::resilience::ResilienceCoordinator;
use crate::sync::SyncChannel;

/// Spawns the recovery probe.
pub fn spawn_recovery_task(
    coordinator: Arc<ResilienceCoordinator>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Starting recovery probe task");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if coordinator.is_offline_mode() {
                        debug!("Probing origin health");
                        coordinator.try_recover().await;
                    }
                }
                _ = coordinator.recovery_requested() => {
                    debug!("Origin answered while offline, probing health");
                    coordinator.try_recover().await;
                }
            }
        }
    })
}

/// Spawns the network watcher.
pub fn spawn_network_watcher(
    network: Arc<dyn NetworkStatus>,
    coordinator: Arc<ResilienceCoordinator>,
    sync: Arc<SyncChannel>,
) -> JoinHandle<()> {
    let mut changes = network.subscribe();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let online = *changes.borrow_and_update();
            if online {
                info!("Network online");
                sync.wake();
                coordinator.try_recover().await;
            } else {
                coordinator.enter_offline_mode("network offline");
            }
        }
        debug!("Network status source closed, watcher exiting");
    })
}
