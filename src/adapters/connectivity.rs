//! Reachability probe
//!
//! Drives a [`WatchNetworkStatus`] from periodic TCP connects to the origin
//! host. Stands in for an OS connectivity signal in the server binary.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapters::WatchNetworkStatus;
use crate::ports::NetworkStatus;

/// `host:port` to probe for an origin base URL.
pub fn probe_address(origin_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(origin_url).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

async fn reachable(address: &str, connect_timeout: Duration) -> bool {
    matches!(
        timeout(connect_timeout, TcpStream::connect(address)).await,
        Ok(Ok(_))
    )
}

/// Spawns the reachability probe.
pub fn spawn_connectivity_probe(
    status: Arc<WatchNetworkStatus>,
    address: String,
    every: Duration,
    connect_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(address = %address, interval_secs = every.as_secs(), "Starting reachability probe");
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let online = reachable(&address, connect_timeout).await;
            match (status.is_online(), online) {
                (true, false) => warn!(address = %address, "Origin host unreachable"),
                (false, true) => info!(address = %address, "Origin host reachable again"),
                _ => debug!(online, "Reachability unchanged"),
            }
            status.set_online(online);
        }
    })
}
