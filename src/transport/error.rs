use thiserror::Error;

/// Failures surfaced by the transport as `TransportEvent::Error`.
///
/// Everything except `MaxReconnectAttempts` is recoverable: the connection
/// either keeps running (`MalformedMessage`, `NotConnected`) or schedules a
/// reconnect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Heartbeat timeout: no pong within {timeout_ms}ms")]
    HeartbeatTimeout { timeout_ms: u64 },

    #[error("Max reconnect attempts reached ({attempts})")]
    MaxReconnectAttempts { attempts: u32 },

    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Whether the transport gives up after this error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MaxReconnectAttempts { .. })
    }
}
