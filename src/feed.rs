// =============================================================================
// Feed — transport events into price history and the series cache
// =============================================================================
//
// Sits on the event bus next to any other listener. Each price-bearing
// message is appended to the history for its key, the key's cache entry is
// dropped and the bundle recomputed, so readers always see indicators over
// the latest data. Events are handled one at a time, which serialises cache
// invalidation per key.
// =============================================================================

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use crate::app_state::AppState;
use crate::event_bus::Subscription;
use crate::market_data::{parse_market_message, TickBatch};
use crate::transport::{TransportEvent, WireMessage};
use crate::types::SeriesKey;

/// Consume transport events until the bus closes.
pub async fn run_feed(state: Arc<AppState>, mut events: Subscription<TransportEvent>, subscription: SeriesKey) {
    info!(%subscription, "market data feed started");
    while let Some(event) = events.recv().await {
        handle_event(&state, &subscription, event);
    }
    info!("market data feed stopped");
}

pub fn handle_event(state: &AppState, subscription: &SeriesKey, event: TransportEvent) {
    match event {
        TransportEvent::Message(msg) if msg.kind == "error" => {
            let message = server_error_text(&msg);
            warn!(%message, "market data server reported an error");
            state.push_error("server", message);
        }
        TransportEvent::Message(msg) => match parse_market_message(&msg, subscription) {
            Ok(Some(batch)) => ingest(state, batch),
            Ok(None) => trace!(kind = %msg.kind, "ignoring non-price message"),
            Err(e) => {
                warn!(kind = %msg.kind, error = %e, "dropping unparseable market message");
                state.push_error("feed", format!("{e:#}"));
            }
        },
        TransportEvent::Error(e) => {
            if e.is_terminal() {
                error!(error = %e, "market data connection gave up; reconnect via /api/v1/connection/connect");
            }
            state.push_error("transport", e.to_string());
        }
        TransportEvent::StateChanged { from, to } => debug!(%from, %to, "connection state changed"),
        TransportEvent::Open => debug!("feed connected"),
        TransportEvent::Close { code, reason } => debug!(?code, %reason, "feed disconnected"),
    }
}

fn ingest(state: &AppState, batch: TickBatch) {
    let TickBatch { key, points } = batch;
    if points.is_empty() {
        return;
    }
    let received = points.len();
    state.history.extend(key.clone(), points);
    state.cache.invalidate(&key);

    let history = state.history.snapshot(&key);
    match state.cache.get_or_compute(&key, &history) {
        Ok(entry) => {
            let latest = entry.bundle.snapshot();
            debug!(
                %key,
                received,
                points = history.len(),
                price = ?latest.price,
                rsi = ?latest.rsi,
                "series refreshed"
            );
        }
        Err(e) => {
            warn!(%key, error = %e, "indicator refresh failed");
            state.push_error("feed", format!("{e:#}"));
        }
    }
}

fn server_error_text(msg: &WireMessage) -> String {
    match &msg.data {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| msg.data.to_string()),
        Value::Null => "unspecified server error".to_string(),
        other => other.to_string(),
    }
}
