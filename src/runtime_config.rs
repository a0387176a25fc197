// =============================================================================
// Runtime Configuration — service settings
// =============================================================================
//
// Every tunable parameter of the market-pulse service lives here. The file
// is JSON; all fields carry `#[serde(default)]` so that an older or partial
// file still loads. The service only reads it: environment overrides apply
// to the in-memory copy and never reach the file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::TtlTable;
use crate::indicators::IndicatorParams;
use crate::transport::TransportConfig;
use crate::types::SeriesKey;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "PULSE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "runtime_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTC/USDT".to_string()
}

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_history_capacity() -> usize {
    500
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Market data socket, heartbeat and reconnect policy.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Symbol sent in the subscribe handshake.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    /// Price points retained per (symbol, timeframe).
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default)]
    pub indicators: IndicatorParams,

    /// Cache TTL per timeframe.
    #[serde(default)]
    pub ttl: TtlTable,

    /// Listen address of the read API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            history_capacity: default_history_capacity(),
            indicators: IndicatorParams::default(),
            ttl: TtlTable::default(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            url = %config.transport.url,
            subscription = %config.subscription(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Startup configuration: the file at `path`, or defaults when it is
    /// missing or unreadable, with environment overrides from `lookup` on top.
    pub fn resolve<F>(path: impl AsRef<Path>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load(path).unwrap_or_else(|e| {
            warn!(error = %format!("{e:#}"), "Failed to load config, using defaults");
            Self::default()
        });
        config.apply_env(lookup);
        config
    }

    /// Apply `PULSE_WS_URL`, `PULSE_SYMBOL`, `PULSE_TIMEFRAME` and
    /// `PULSE_BIND_ADDR` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PULSE_WS_URL") {
            self.transport.url = url;
        }
        if let Some(symbol) = lookup("PULSE_SYMBOL") {
            self.symbol = symbol;
        }
        if let Some(timeframe) = lookup("PULSE_TIMEFRAME") {
            self.timeframe = timeframe;
        }
        if let Some(addr) = lookup("PULSE_BIND_ADDR") {
            self.bind_addr = addr;
        }
    }

    /// The key the transport subscribes to.
    pub fn subscription(&self) -> SeriesKey {
        SeriesKey::new(self.symbol.clone(), self.timeframe.clone())
    }
}
