// =============================================================================
// Central Application State — market-pulse
// =============================================================================
//
// Ties the long-lived pieces together for the feed task and the read API:
// the price history, the series cache, the live connection state and a
// bounded log of recent errors.
//
// Thread safety:
//   - parking_lot::RwLock for the mutable shared collections.
//   - Arc wrappers for components that manage their own interior mutability.
//   - The transport handle is a cheap clone over channels to its own task.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::cache::SeriesCache;
use crate::market_data::PriceHistory;
use crate::runtime_config::RuntimeConfig;
use crate::transport::{ConnectionState, TransportHandle};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the error log endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Where the error came from: `"transport"`, `"server"` or `"feed"`.
    pub source: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub history: Arc<PriceHistory>,
    pub cache: Arc<SeriesCache>,

    /// Control surface of the market data connection.
    pub transport: TransportHandle,

    recent_errors: RwLock<VecDeque<ErrorRecord>>,

    /// Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, transport: TransportHandle) -> Self {
        let history = Arc::new(PriceHistory::new(config.history_capacity));
        let cache = Arc::new(SeriesCache::new(config.ttl.clone(), config.indicators.clone()));

        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            history,
            cache,
            transport,
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error. The log is capped at [`MAX_RECENT_ERRORS`]; oldest
    /// entries are evicted first.
    pub fn push_error(&self, source: &str, message: impl Into<String>) {
        let record = ErrorRecord {
            message: message.into(),
            source: source.to_string(),
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push_back(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.pop_front();
        }
    }

    /// Recent errors, oldest first.
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().iter().cloned().collect()
    }
}
