// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// View of the service under `/api/v1/`, plus connection control. Symbols
// contain a `/`, so path segments accept either the URL-encoded form
// (`BTC%2FUSDT`) or a dash in its place (`BTC-USDT`).
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::cache::CacheEntry;
use crate::signals::MarketSnapshot;
use crate::transport::{ConnectionState, WireMessage};
use crate::types::SeriesKey;

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/series/:symbol/:timeframe", get(series))
        .route("/api/v1/snapshot/:symbol/:timeframe", get(snapshot))
        .route("/api/v1/errors", get(errors))
        .route("/api/v1/connection/connect", post(connection_connect))
        .route("/api/v1/connection/close", post(connection_close))
        .route("/api/v1/connection/send", post(connection_send))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

/// `BTC-USDT` and `BTC/USDT` name the same market.
fn series_key(symbol: &str, timeframe: &str) -> SeriesKey {
    SeriesKey::new(symbol.replace('-', "/"), timeframe)
}

/// Current cache entry for the key, recomputed from history when stale.
fn load_entry(state: &AppState, key: &SeriesKey) -> Result<Arc<CacheEntry>, Response> {
    if let Some(entry) = state.cache.get(key) {
        return Ok(entry);
    }

    let history = state.history.snapshot(key);
    if history.is_empty() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("no price history for {key}"),
        ));
    }

    state.cache.get_or_compute(key, &history).map_err(|e| {
        warn!(%key, error = %e, "series compute failed");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    })
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connection: ConnectionState,
    subscription: SeriesKey,
    /// Stored points for the subscribed series.
    history_points: usize,
    uptime_secs: u64,
    cached_series: usize,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let subscription = state.runtime_config.read().subscription();
    let resp = HealthResponse {
        status: "ok",
        connection: state.connection_state(),
        history_points: state.history.count(&subscription),
        subscription,
        uptime_secs: state.uptime_secs(),
        cached_series: state.cache.len(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Series & snapshot
// =============================================================================

async fn series(
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Response {
    let key = series_key(&symbol, &timeframe);
    match load_entry(&state, &key) {
        Ok(entry) => Json(entry.as_ref()).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Serialize)]
struct SnapshotResponse {
    key: SeriesKey,
    computed_at: String,
    points: usize,
    latest: MarketSnapshot,
}

async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Response {
    let key = series_key(&symbol, &timeframe);
    match load_entry(&state, &key) {
        Ok(entry) => Json(SnapshotResponse {
            key: entry.key.clone(),
            computed_at: entry.computed_at.to_rfc3339(),
            points: entry.bundle.len(),
            latest: entry.bundle.snapshot(),
        })
        .into_response(),
        Err(resp) => resp,
    }
}

// =============================================================================
// Errors
// =============================================================================

async fn errors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.recent_errors())
}

// =============================================================================
// Connection control
// =============================================================================

#[derive(Serialize)]
struct ConnectionResponse {
    /// State when the command was issued; the change itself is asynchronous.
    connection: ConnectionState,
    message: String,
}

/// Also the way back after the transport gave up (`Failed`).
async fn connection_connect(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connection = state.connection_state();
    state.transport.connect();
    info!(%connection, "connect requested via API");

    (
        StatusCode::ACCEPTED,
        Json(ConnectionResponse {
            connection,
            message: "Connect requested".to_string(),
        }),
    )
}

async fn connection_close(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connection = state.connection_state();
    state.transport.close();
    warn!(%connection, "close requested via API");

    (
        StatusCode::ACCEPTED,
        Json(ConnectionResponse {
            connection,
            message: "Close requested".to_string(),
        }),
    )
}

/// Forward one raw message to the market data server.
async fn connection_send(
    State(state): State<Arc<AppState>>,
    Json(msg): Json<WireMessage>,
) -> Response {
    let connection = state.connection_state();
    if connection != ConnectionState::Open {
        return error_response(
            StatusCode::CONFLICT,
            format!("cannot send while {connection}"),
        );
    }

    info!(kind = %msg.kind, "outbound message via API");
    state.transport.send(msg);
    (
        StatusCode::ACCEPTED,
        Json(ConnectionResponse {
            connection,
            message: "Message queued".to_string(),
        }),
    )
        .into_response()
}
