//! Telemetry fusion backend
//!
//! Real-time ingestion and sensor-fusion pipeline for autonomous-navigation
//! safety: fuses accelerometer/gyroscope/magnetometer/GPS/RSSI packets into
//! per-device position, heading, speed, and confidence, and raises
//! proximity/speed alerts over a WebSocket transport.

use std::sync::Arc;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod adapter;
mod alerts;
mod config;
mod dispatcher;
mod errors;
mod events;
mod fusion;
mod geometry;
mod models;
mod positioning;
mod proximity;
mod smoothing;
mod store;

use adapter::websocket::{BroadcastSink, WebSocketAdapter};
use config::Config;
use dispatcher::Dispatcher;

const DEFAULT_PORT: u16 = 3000;
const SNAPSHOT_PATH: &str = "data/info.json";
const BROADCAST_CAPACITY: usize = 256;

/// `PORT` (spec.md §6 configuration table) — the adapter transport's own
/// setting, not part of `Config` since the core never sees it.
fn resolve_port() -> u16 {
    std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_fusion_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!("starting telemetry fusion backend");

    let config = Config::from_env();
    info!(?config, "loaded configuration");

    let snapshot_path = PathBuf::from(SNAPSHOT_PATH);

    let (sink, tx) = BroadcastSink::channel(BROADCAST_CAPACITY);
    let mut dispatcher = Dispatcher::new(config, Box::new(sink));
    dispatcher.set_snapshot_path(snapshot_path.clone());
    let dispatcher = Arc::new(dispatcher);

    let restored = store::load_snapshot(&snapshot_path, store::now_ms()).await;
    if !restored.is_empty() {
        dispatcher.store().load_all(restored);
    }

    let prune_handle = tokio::spawn(run_prune_loop(dispatcher.clone()));
    let sweep_handle = tokio::spawn(run_alert_sweep_loop(dispatcher.clone()));
    let persist_handle = tokio::spawn(run_persistence_loop(dispatcher.clone(), snapshot_path));

    let port = resolve_port();
    let adapter = WebSocketAdapter::new(port, dispatcher.clone(), tx);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = adapter.run().await {
            error!("websocket adapter error: {e}");
        }
    });

    info!("all systems operational, listening on ws://0.0.0.0:{port}");

    tokio::select! {
        result = server_handle => {
            if let Err(e) = result {
                error!("websocket adapter task panicked: {e}");
            }
        }
        result = prune_handle => {
            if let Err(e) = result {
                error!("prune task panicked: {e}");
            }
        }
        result = sweep_handle => {
            if let Err(e) = result {
                error!("dedup sweep task panicked: {e}");
            }
        }
        result = persist_handle => {
            if let Err(e) = result {
                error!("persistence task panicked: {e}");
            }
        }
    }

    info!("shutting down");
    Ok(())
}

/// Drop stale devices every ~10s (spec.md §4.3).
async fn run_prune_loop(dispatcher: Arc<Dispatcher>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        ticker.tick().await;
        let removed = dispatcher.prune(store::now_ms());
        if !removed.is_empty() {
            info!("pruned {} stale device(s)", removed.len());
        }
    }
}

/// Evict stale dedup-table entries every ~10s (spec.md §4.6).
async fn run_alert_sweep_loop(dispatcher: Arc<Dispatcher>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        ticker.tick().await;
        dispatcher.sweep_alerts(store::now_ms());
    }
}

/// Persist a device snapshot to disk every 10 seconds (spec.md §4.3, §7).
async fn run_persistence_loop(dispatcher: Arc<Dispatcher>, path: PathBuf) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        ticker.tick().await;
        store::save_snapshot(&path, dispatcher.store()).await;
    }
}
