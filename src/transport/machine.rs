//! Connection state machine — no I/O, no clocks.
//!
//! Every user command, socket event and timer expiry enters as an [`Input`];
//! [`ConnectionMachine::handle`] updates the [`ConnectionState`] and returns
//! the [`Effect`]s the driver must carry out, in order. Timer bookkeeping
//! lives here too, so a timer is cancelled exactly once no matter how many
//! paths try to clear it.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──opened──▶ Open
//!                        ▲                  │ error / close / pong timeout
//!                        │ delay elapsed    ▼
//!                        └────────── Reconnecting ──attempts ≥ max──▶ Failed
//! any ──close()──▶ Closed
//! ```

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::{
    ConnectionState, TransportConfig, TransportError, TransportEvent, WireMessage,
    NORMAL_CLOSE_CODE, PONG_TIMEOUT_CODE, PONG_TIMEOUT_REASON,
};
use crate::types::SeriesKey;

// ─── Inputs & effects ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// `connect()` from the owner.
    Connect,
    /// `close()` from the owner.
    Close,
    /// `send()` from the owner.
    Send(WireMessage),
    SocketOpened,
    /// Connection attempt or live socket failed.
    SocketFailed(String),
    SocketClosed { code: Option<u16>, reason: String },
    /// Inbound text frame.
    Inbound(String),
    /// Inbound control or binary frame. Liveness only.
    Activity,
    PingDue,
    PongDeadline,
    ReconnectDue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenSocket,
    Transmit(WireMessage),
    CloseSocket { code: u16, reason: String },
    StartHeartbeat,
    StopHeartbeat,
    ArmPongDeadline,
    ClearPongDeadline,
    ScheduleReconnect(Duration),
    CancelReconnect,
    Publish(TransportEvent),
}

/// Which timers the driver currently has armed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timers {
    pub heartbeat: bool,
    pub pong_deadline: bool,
    pub reconnect: bool,
}

#[cfg(test)]
impl Timers {
    pub fn is_idle(&self) -> bool {
        !self.heartbeat && !self.pong_deadline && !self.reconnect
    }
}

// ─── Machine ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    reconnect_delay: Duration,
    pong_timeout_ms: u64,
    subscription: SeriesKey,
    timers: Timers,
}

impl ConnectionMachine {
    pub fn new(config: &TransportConfig, subscription: SeriesKey) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            max_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
            pong_timeout_ms: config.pong_timeout_ms,
            subscription,
            timers: Timers::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts since the last successful open.
    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[cfg(test)]
    pub fn timers(&self) -> Timers {
        self.timers
    }

    /// Feed one input and collect the resulting effects.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut fx = Vec::new();

        match input {
            Input::Connect => match self.state {
                ConnectionState::Connecting | ConnectionState::Open => {
                    debug!(state = %self.state, "connect() ignored, connection already active");
                }
                ConnectionState::Idle
                | ConnectionState::Reconnecting
                | ConnectionState::Closed
                | ConnectionState::Failed => {
                    self.cancel_reconnect(&mut fx);
                    self.attempts = 0;
                    self.begin_connect(&mut fx);
                }
            },

            Input::Close => {
                self.clear_timers(&mut fx);
                match self.state {
                    ConnectionState::Closed => {}
                    ConnectionState::Connecting | ConnectionState::Open => {
                        let reason = "Client disconnect".to_string();
                        fx.push(Effect::CloseSocket {
                            code: NORMAL_CLOSE_CODE,
                            reason: reason.clone(),
                        });
                        self.transition(ConnectionState::Closed, &mut fx);
                        fx.push(Effect::Publish(TransportEvent::Close {
                            code: Some(NORMAL_CLOSE_CODE),
                            reason,
                        }));
                    }
                    ConnectionState::Idle | ConnectionState::Reconnecting | ConnectionState::Failed => {
                        self.transition(ConnectionState::Closed, &mut fx);
                    }
                }
            }

            Input::Send(msg) => {
                if self.state == ConnectionState::Open {
                    fx.push(Effect::Transmit(msg));
                } else {
                    warn!(state = %self.state, kind = %msg.kind, "send() while not connected");
                    fx.push(Effect::Publish(TransportEvent::Error(TransportError::NotConnected)));
                }
            }

            Input::SocketOpened => {
                if self.state == ConnectionState::Connecting {
                    self.attempts = 0;
                    self.transition(ConnectionState::Open, &mut fx);
                    info!(subscription = %self.subscription, "market data socket open");
                    fx.push(Effect::Publish(TransportEvent::Open));
                    fx.push(Effect::Transmit(WireMessage::subscribe(&self.subscription)));
                    self.timers.heartbeat = true;
                    fx.push(Effect::StartHeartbeat);
                } else {
                    // A socket finished its handshake after the attempt was abandoned.
                    warn!(state = %self.state, "dropping socket opened outside Connecting");
                    fx.push(Effect::CloseSocket {
                        code: NORMAL_CLOSE_CODE,
                        reason: "Stale connection".to_string(),
                    });
                }
            }

            Input::SocketFailed(reason) => {
                if self.is_live() {
                    warn!(state = %self.state, reason = %reason, "market data socket failed");
                    fx.push(Effect::Publish(TransportEvent::Error(TransportError::ConnectionFailed(
                        reason,
                    ))));
                    self.connection_lost(&mut fx);
                }
            }

            Input::SocketClosed { code, reason } => {
                if self.is_live() {
                    info!(code = ?code, reason = %reason, "market data socket closed");
                    fx.push(Effect::Publish(TransportEvent::Close { code, reason }));
                    self.connection_lost(&mut fx);
                }
            }

            Input::Inbound(text) => {
                if self.state == ConnectionState::Open {
                    self.clear_pong_deadline(&mut fx);
                    match serde_json::from_str::<WireMessage>(&text) {
                        Ok(msg) if msg.is_pong() => {}
                        Ok(msg) => fx.push(Effect::Publish(TransportEvent::Message(msg))),
                        Err(e) => {
                            warn!(error = %e, raw = %text, "failed to parse inbound message");
                            fx.push(Effect::Publish(TransportEvent::Error(
                                TransportError::MalformedMessage(e.to_string()),
                            )));
                        }
                    }
                }
            }

            Input::Activity => {
                if self.state == ConnectionState::Open {
                    self.clear_pong_deadline(&mut fx);
                }
            }

            Input::PingDue => {
                if self.state == ConnectionState::Open && self.timers.heartbeat {
                    fx.push(Effect::Transmit(WireMessage::ping()));
                    // The oldest unanswered ping owns the deadline.
                    if !self.timers.pong_deadline {
                        self.timers.pong_deadline = true;
                        fx.push(Effect::ArmPongDeadline);
                    }
                }
            }

            Input::PongDeadline => {
                if self.state == ConnectionState::Open && self.timers.pong_deadline {
                    self.timers.pong_deadline = false;
                    warn!(timeout_ms = self.pong_timeout_ms, "pong timeout, forcing reconnect");
                    fx.push(Effect::CloseSocket {
                        code: PONG_TIMEOUT_CODE,
                        reason: PONG_TIMEOUT_REASON.to_string(),
                    });
                    fx.push(Effect::Publish(TransportEvent::Error(TransportError::HeartbeatTimeout {
                        timeout_ms: self.pong_timeout_ms,
                    })));
                    fx.push(Effect::Publish(TransportEvent::Close {
                        code: Some(PONG_TIMEOUT_CODE),
                        reason: PONG_TIMEOUT_REASON.to_string(),
                    }));
                    self.connection_lost(&mut fx);
                }
            }

            Input::ReconnectDue => {
                if self.state == ConnectionState::Reconnecting && self.timers.reconnect {
                    self.timers.reconnect = false;
                    self.begin_connect(&mut fx);
                }
            }
        }

        fx
    }

    fn is_live(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Open)
    }

    fn begin_connect(&mut self, fx: &mut Vec<Effect>) {
        self.transition(ConnectionState::Connecting, fx);
        fx.push(Effect::OpenSocket);
    }

    fn connection_lost(&mut self, fx: &mut Vec<Effect>) {
        self.stop_heartbeat(fx);
        self.clear_pong_deadline(fx);

        if self.attempts >= self.max_attempts {
            error!(attempts = self.attempts, "max reconnect attempts reached, giving up");
            self.transition(ConnectionState::Failed, fx);
            fx.push(Effect::Publish(TransportEvent::Error(
                TransportError::MaxReconnectAttempts {
                    attempts: self.attempts,
                },
            )));
            return;
        }

        self.attempts += 1;
        info!(
            attempt = self.attempts,
            max = self.max_attempts,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.transition(ConnectionState::Reconnecting, fx);
        self.timers.reconnect = true;
        fx.push(Effect::ScheduleReconnect(self.reconnect_delay));
    }

    fn transition(&mut self, to: ConnectionState, fx: &mut Vec<Effect>) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "transport state transition");
        self.state = to;
        fx.push(Effect::Publish(TransportEvent::StateChanged { from, to }));
    }

    fn stop_heartbeat(&mut self, fx: &mut Vec<Effect>) {
        if self.timers.heartbeat {
            self.timers.heartbeat = false;
            fx.push(Effect::StopHeartbeat);
        }
    }

    fn clear_pong_deadline(&mut self, fx: &mut Vec<Effect>) {
        if self.timers.pong_deadline {
            self.timers.pong_deadline = false;
            fx.push(Effect::ClearPongDeadline);
        }
    }

    fn cancel_reconnect(&mut self, fx: &mut Vec<Effect>) {
        if self.timers.reconnect {
            self.timers.reconnect = false;
            fx.push(Effect::CancelReconnect);
        }
    }

    fn clear_timers(&mut self, fx: &mut Vec<Effect>) {
        self.stop_heartbeat(fx);
        self.clear_pong_deadline(fx);
        self.cancel_reconnect(fx);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
