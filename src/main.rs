//! permcache server
//!
//! Serves the permission resolver over HTTP, backed by the origin service,
//! a file mirror and the websocket sync channel.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use permcache::adapters::{
    probe_address, spawn_connectivity_probe, FileDurableStore, HttpOrigin, SystemClock,
    WatchNetworkStatus, WsTransport,
};
use permcache::api::{create_router, AppState};
use permcache::{Config, PermissionResolver, ResolverPorts};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the adapters, the reachability probe and the resolver
/// 4. Load the mirror, connect sync and start background tasks
/// 5. Serve the router until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to info, overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "permcache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting permcache server");

    let config = Config::from_env();
    info!(
        port = config.server_port,
        origin = %config.origin_url,
        store = %config.store_path.display(),
        max_entries = config.cache.max_entries,
        sync_enabled = config.sync.url.is_some(),
        "Configuration loaded"
    );

    let origin = HttpOrigin::new(
        config.origin_url.clone(),
        config.resilience.origin_timeout,
        config.resilience.health_timeout,
    )
    .context("building origin client")?;

    let network = Arc::new(WatchNetworkStatus::new(true));
    let probe = match probe_address(&config.origin_url) {
        Some(address) => Some(spawn_connectivity_probe(
            network.clone(),
            address,
            config.resilience.health_check_interval,
            config.resilience.health_timeout,
        )),
        None => {
            warn!(origin = %config.origin_url, "No host in origin URL, assuming always online");
            None
        }
    };

    let ports = ResolverPorts {
        origin: Arc::new(origin),
        durable: Arc::new(FileDurableStore::new(config.store_path.clone())),
        transport: Arc::new(WsTransport),
        network,
        clock: Arc::new(SystemClock),
    };
    let port = config.server_port;
    let resolver = Arc::new(PermissionResolver::new(config, ports));
    resolver.start().await;

    let app = create_router(AppState::new(resolver.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(resolver))
        .await
        .context("serving HTTP")?;

    if let Some(probe) = probe {
        probe.abort();
    }
    info!("Server shutdown complete");
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then stops the resolver.
async fn shutdown_signal(resolver: Arc<PermissionResolver>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    resolver.shutdown();
}
