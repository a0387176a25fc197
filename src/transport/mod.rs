//! Market data transport — one persistent WebSocket, its heartbeat and its
//! reconnection policy.
//!
//! The connection lifecycle is an explicit state machine ([`machine`]) that
//! turns socket events, timer expiries and user commands into effects. The
//! tokio driver ([`client`]) owns the socket and timers, executes those
//! effects and publishes every [`TransportEvent`] on the event bus.

pub mod client;
pub mod error;
pub mod machine;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::SeriesKey;

pub use client::{Transport, TransportHandle};
pub use error::TransportError;

/// Close code sent by the client on an intentional disconnect.
pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Close code used when the pong deadline elapses.
pub const PONG_TIMEOUT_CODE: u16 = 4000;
pub const PONG_TIMEOUT_REASON: &str = "Pong timeout";
pub const DEFAULT_PROTOCOL: &str = "market-data";

// ─── Connection state ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Closed on request. Terminal until the next `connect()`.
    Closed,
    /// Reconnect attempts exhausted. Terminal until the next `connect()`.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ─── Wire messages ───────────────────────────────────────────────────────────

/// Envelope used in both directions: `{ "type": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl WireMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// `{ "type": "subscribe", "data": { "symbol": .., "timeframe": .. } }`
    pub fn subscribe(key: &SeriesKey) -> Self {
        Self::new(
            "subscribe",
            serde_json::json!({ "symbol": key.symbol, "timeframe": key.timeframe }),
        )
    }

    /// `{ "type": "ping" }`
    pub fn ping() -> Self {
        Self::new("ping", Value::Null)
    }

    pub fn is_pong(&self) -> bool {
        self.kind == "pong"
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Everything the transport tells the rest of the process.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Open,
    Message(WireMessage),
    Error(TransportError),
    Close { code: Option<u16>, reason: String },
}

// ─── Configuration ───────────────────────────────────────────────────────────

fn default_url() -> String {
    "ws://localhost:5002/ws/market-data".to_string()
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_pong_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

/// Socket, heartbeat and reconnect settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_url")]
    pub url: String,

    /// WebSocket subprotocol offered during the handshake. Empty = none.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Fixed delay between reconnect attempts (no backoff).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            protocol: default_protocol(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TransportConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
