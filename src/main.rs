// =============================================================================
// Market Pulse — Main Entry Point
// =============================================================================
//
// One WebSocket feed of live prices, an indicator cache over the rolling
// history, and a read-only HTTP API on top.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cache;
mod event_bus;
mod feed;
mod indicators;
mod market_data;
mod runtime_config;
mod signals;
mod transport;
mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::event_bus::EventBus;
use crate::runtime_config::{RuntimeConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use crate::transport::{Transport, TransportEvent};

/// Events retained for a subscriber that falls behind.
const EVENT_BUS_CAPACITY: usize = 1024;
/// How often expired cache entries are dropped.
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Market Pulse starting up");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = RuntimeConfig::resolve(&config_path, |name| std::env::var(name).ok());
    config
        .indicators
        .validate()
        .context("invalid indicator settings")?;

    let subscription = config.subscription();
    let bind_addr = config.bind_addr.clone();
    info!(
        url = %config.transport.url,
        %subscription,
        history = config.history_capacity,
        "Configured market data feed"
    );

    // ── 2. Transport & shared state ──────────────────────────────────────
    let bus: EventBus<TransportEvent> = EventBus::new(EVENT_BUS_CAPACITY);
    let transport = Transport::spawn(config.transport.clone(), subscription.clone(), bus.clone());
    let state = Arc::new(AppState::new(config, transport.handle()));

    // ── 3. Feed: bus → history → cache ───────────────────────────────────
    let feed = tokio::spawn(feed::run_feed(state.clone(), transport.subscribe(), subscription));
    info!(subscribers = bus.subscriber_count(), "event bus ready");

    // ── 4. Cache housekeeping ────────────────────────────────────────────
    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            if purge_state.cache.is_empty() {
                continue;
            }
            let purged = purge_state.cache.purge_expired();
            if purged > 0 {
                info!(purged, "expired series dropped from cache");
            }
        }
    });

    // ── 5. API server ────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 6. Connect ───────────────────────────────────────────────────────
    transport.connect();
    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping gracefully");

    info!(connection = %transport.state(), "closing market data connection");
    transport.close();
    transport.shutdown().await;
    drop(bus);
    if tokio::time::timeout(Duration::from_secs(2), feed).await.is_err() {
        warn!("feed did not drain within 2s");
    }

    info!("Market Pulse shut down complete.");
    Ok(())
}
