//! Native transport driver — `tokio-tungstenite`.
//!
//! One background task owns the socket and every timer, feeds socket events,
//! timer expiries and commands into the [`ConnectionMachine`], and carries out
//! the effects it returns. Because a single task does all of this, state
//! changes never race and `close()` can cancel every pending timer before
//! another one fires.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::machine::{ConnectionMachine, Effect, Input};
use super::{ConnectionState, TransportConfig, TransportError, TransportEvent, WireMessage};
use crate::event_bus::{EventBus, Subscription};
use crate::types::SeriesKey;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type FrameResult = Option<Result<Message, tokio_tungstenite::tungstenite::Error>>;

// ─── Commands from the public handle to the background task ──────────────────

#[derive(Debug, PartialEq)]
pub(crate) enum Command {
    Connect,
    Send(WireMessage),
    Close,
    /// Close, then end the task.
    Shutdown,
}

// ─── Public handle ───────────────────────────────────────────────────────────

/// Cloneable control surface of a running connection.
///
/// Every clone talks to the same background task. All results surface as
/// [`TransportEvent`]s on the bus passed to [`Transport::spawn`].
#[derive(Clone)]
pub struct TransportHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    bus: EventBus<TransportEvent>,
}

impl TransportHandle {
    /// Open the connection. No-op while `Connecting` or `Open`.
    pub fn connect(&self) {
        if self.cmd_tx.send(Command::Connect).is_err() {
            warn!("connect() after transport task ended");
        }
    }

    /// Queue `msg` for the socket. Outside `Open` this publishes a
    /// `NotConnected` error instead.
    pub fn send(&self, msg: WireMessage) {
        if self.cmd_tx.send(Command::Send(msg)).is_err() {
            self.bus
                .publish(TransportEvent::Error(TransportError::NotConnected));
        }
    }

    /// Tear down the socket and cancel every timer. Idempotent.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> Subscription<TransportEvent> {
        self.bus.subscribe()
    }

    /// Handle with no task behind it: the caller drives the state and reads
    /// the commands.
    #[cfg(test)]
    pub(crate) fn detached(
        bus: EventBus<TransportEvent>,
    ) -> (Self, watch::Sender<ConnectionState>, mpsc::UnboundedReceiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        (
            Self {
                cmd_tx,
                state_rx,
                bus,
            },
            state_tx,
            cmd_rx,
        )
    }
}

/// Owner of the background task behind a [`TransportHandle`].
///
/// Nothing happens until [`TransportHandle::connect`]. Dropping the owner
/// aborts the task; [`Transport::shutdown`] stops it cleanly.
pub struct Transport {
    handle: TransportHandle,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Start the background task in `Idle`. Must be called inside a tokio
    /// runtime.
    pub fn spawn(config: TransportConfig, subscription: SeriesKey, bus: EventBus<TransportEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            machine: ConnectionMachine::new(&config, subscription),
            config,
            bus: bus.clone(),
            state_tx,
            socket: None,
            connecting: None,
            heartbeat: None,
            pong_deadline: None,
            reconnect_at: None,
        };
        let task = tokio::spawn(driver.run(cmd_rx));

        Self {
            handle: TransportHandle {
                cmd_tx,
                state_rx,
                bus,
            },
            task: Some(task),
        }
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Close and wait (bounded) for the background task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.handle.cmd_tx.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("transport task did not stop within 5s");
            }
        }
    }
}

impl std::ops::Deref for Transport {
    type Target = TransportHandle;

    fn deref(&self) -> &TransportHandle {
        &self.handle
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

struct Driver {
    config: TransportConfig,
    machine: ConnectionMachine,
    bus: EventBus<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    socket: Option<WsStream>,
    connecting: Option<BoxFuture<'static, Result<WsStream, String>>>,
    heartbeat: Option<Interval>,
    pong_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let input = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect) => Input::Connect,
                    Some(Command::Send(msg)) => Input::Send(msg),
                    Some(Command::Close) => Input::Close,
                    Some(Command::Shutdown) | None => {
                        self.dispatch(Input::Close).await;
                        debug!("transport task stopped");
                        return;
                    }
                },

                result = next_connect(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(ws) => {
                            self.socket = Some(ws);
                            Input::SocketOpened
                        }
                        Err(reason) => Input::SocketFailed(reason),
                    }
                }

                frame = next_frame(&mut self.socket) => self.on_frame(frame).await,

                () = tick(&mut self.heartbeat) => Input::PingDue,

                () = sleep_until(self.pong_deadline) => {
                    self.pong_deadline = None;
                    Input::PongDeadline
                }

                () = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    Input::ReconnectDue
                }
            };

            self.dispatch(input).await;
        }
    }

    /// Run `input` through the machine, then every effect it produced.
    /// Effects that fail locally (a send on a dead socket) queue a follow-up
    /// input instead of re-entering the machine.
    async fn dispatch(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            let effects = self.machine.handle(input);
            self.state_tx.send_replace(self.machine.state());
            for effect in effects {
                if let Some(follow_up) = self.apply(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn apply(&mut self, effect: Effect) -> Option<Input> {
        match effect {
            Effect::OpenSocket => {
                self.socket = None;
                info!(url = %self.config.url, "connecting to market data WebSocket");
                self.connecting = Some(
                    open_socket(
                        self.config.url.clone(),
                        self.config.protocol.clone(),
                        self.config.connect_timeout(),
                    )
                    .boxed(),
                );
            }
            Effect::Transmit(msg) => {
                let Some(ws) = self.socket.as_mut() else {
                    warn!(kind = %msg.kind, "transmit with no socket");
                    return None;
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "failed to serialise outbound message");
                        return None;
                    }
                };
                if let Err(e) = ws.send(Message::Text(json)).await {
                    self.socket = None;
                    return Some(Input::SocketFailed(format!("send failed: {e}")));
                }
            }
            Effect::CloseSocket { code, reason } => {
                self.connecting = None;
                if let Some(mut ws) = self.socket.take() {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = ws.close(Some(frame)).await {
                        debug!(error = %e, "close frame not delivered");
                    }
                }
            }
            Effect::StartHeartbeat => {
                let period = self.config.ping_interval();
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(interval);
            }
            Effect::StopHeartbeat => self.heartbeat = None,
            Effect::ArmPongDeadline => {
                self.pong_deadline = Some(Instant::now() + self.config.pong_timeout());
            }
            Effect::ClearPongDeadline => self.pong_deadline = None,
            Effect::ScheduleReconnect(delay) => self.reconnect_at = Some(Instant::now() + delay),
            Effect::CancelReconnect => self.reconnect_at = None,
            Effect::Publish(event) => {
                self.bus.publish(event);
            }
        }
        None
    }

    async fn on_frame(&mut self, frame: FrameResult) -> Input {
        match frame {
            Some(Ok(Message::Text(text))) => Input::Inbound(text),
            Some(Ok(Message::Close(frame))) => {
                // tungstenite queued the close reply; flush it before the
                // socket is dropped.
                if let Some(mut ws) = self.socket.take() {
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "close reply not delivered");
                    }
                }
                let (code, reason) = extract_close(frame.as_ref());
                Input::SocketClosed {
                    code: Some(code),
                    reason,
                }
            }
            // Ping / Pong / Binary — tungstenite answers pings itself.
            Some(Ok(_)) => Input::Activity,
            Some(Err(e)) => {
                self.socket = None;
                Input::SocketFailed(e.to_string())
            }
            None => {
                self.socket = None;
                Input::SocketClosed {
                    code: None,
                    reason: "Stream ended".into(),
                }
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Open a WebSocket, offering `protocol` as subprotocol, bounded by `timeout`.
async fn open_socket(url: String, protocol: String, timeout: Duration) -> Result<WsStream, String> {
    let mut request = url.as_str().into_client_request().map_err(|e| e.to_string())?;
    if !protocol.is_empty() {
        let value = HeaderValue::from_str(&protocol).map_err(|e| e.to_string())?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| "Connection timeout".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(ws)
}

async fn next_connect(slot: &mut Option<BoxFuture<'static, Result<WsStream, String>>>) -> Result<WsStream, String> {
    match slot.as_mut() {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> FrameResult {
    match socket.as_mut() {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame<'_>>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    use crate::transport::{PONG_TIMEOUT_CODE, PONG_TIMEOUT_REASON};

    const WAIT: Duration = Duration::from_secs(5);

    fn key() -> SeriesKey {
        SeriesKey::new("BTC/USDT", "1m")
    }

    fn config(url: String) -> TransportConfig {
        TransportConfig {
            url,
            reconnect_delay_ms: 50,
            max_reconnect_attempts: 2,
            ping_interval_ms: 60_000,
            pong_timeout_ms: 60_000,
            connect_timeout_ms: 2_000,
            ..TransportConfig::default()
        }
    }

    fn echo_protocol(_req: &Request, mut resp: Response) -> Result<Response, ErrorResponse> {
        resp.headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("market-data"));
        Ok(resp)
    }

    /// Local WebSocket server; every accepted connection runs `handler`.
    async fn spawn_server<F, Fut>(handler: F) -> (String, Arc<AtomicUsize>)
    where
        F: Fn(WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_hdr_async(stream, echo_protocol).await {
                        handler(ws).await;
                    }
                });
            }
        });

        (url, accepted)
    }

    /// URL of a port nobody listens on.
    async fn refused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}")
    }

    async fn drain(mut ws: WebSocketStream<TcpStream>) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    async fn next_event(events: &mut Subscription<TransportEvent>) -> TransportEvent {
        timeout(WAIT, events.recv())
            .await
            .expect("event within deadline")
            .expect("bus open")
    }

    async fn wait_for_state(transport: &Transport, wanted: ConnectionState) {
        let mut watch = transport.state_rx.clone();
        timeout(WAIT, watch.wait_for(|s| *s == wanted))
            .await
            .expect("state reached within deadline")
            .expect("watch open");
    }

    #[test]
    fn test_extract_close_with_frame() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "goodbye".into(),
        };
        assert_eq!(extract_close(Some(&frame)), (1000, "goodbye".to_string()));
    }

    #[test]
    fn test_extract_close_no_frame() {
        assert_eq!(extract_close(None), (1006, "No close frame".to_string()));
    }

    #[tokio::test]
    async fn open_subscribe_message_close_in_order() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
        let (url, _) = spawn_server(move |mut ws| {
            let seen_tx = seen_tx.clone();
            async move {
                if let Some(Ok(Message::Text(first))) = ws.next().await {
                    let _ = seen_tx.send(first);
                }
                let tick = r#"{"type":"tick","data":{"timestamp":1,"price":10.5}}"#;
                let _ = ws.send(Message::Text(tick.to_string())).await;
                let _ = ws.close(None).await;
                drain(ws).await;
            }
        })
        .await;

        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(config(url), key(), bus);
        transport.connect();

        let handshake = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
        let handshake: WireMessage = serde_json::from_str(&handshake).unwrap();
        assert_eq!(handshake, WireMessage::subscribe(&key()));

        let mut order = Vec::new();
        loop {
            match next_event(&mut events).await {
                TransportEvent::StateChanged { .. } => {}
                TransportEvent::Open => order.push("open"),
                TransportEvent::Message(msg) => {
                    assert_eq!(msg.kind, "tick");
                    order.push("message");
                }
                TransportEvent::Close { .. } => {
                    order.push("close");
                    break;
                }
                TransportEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(order, vec!["open", "message", "close"]);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn server_close_gets_close_reply() {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<bool>();
        let (url, _) = spawn_server(move |mut ws| {
            let done_tx = done_tx.clone();
            async move {
                let _ = ws.next().await;
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: "restarting".into(),
                };
                let _ = ws.close(Some(frame)).await;
                // A completed handshake ends the stream cleanly; a dropped
                // socket surfaces as a reset error instead.
                let clean = loop {
                    match ws.next().await {
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => break false,
                        None => break true,
                    }
                };
                let _ = done_tx.send(clean);
            }
        })
        .await;

        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(config(url), key(), bus);
        transport.connect();

        loop {
            if let TransportEvent::Close { code, reason } = next_event(&mut events).await {
                assert_eq!(code, Some(1001));
                assert_eq!(reason, "restarting");
                break;
            }
        }
        let clean = timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
        assert!(clean, "client dropped the socket without replying to close");

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn connect_while_open_opens_no_second_socket() {
        let (url, accepted) = spawn_server(|ws| drain(ws)).await;

        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(config(url), key(), bus);
        transport.connect();
        wait_for_state(&transport, ConnectionState::Open).await;

        transport.connect();
        transport.connect();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        let mut opens = 0;
        while let Some(ev) = events.try_recv() {
            if ev == TransportEvent::Open {
                opens += 1;
            }
        }
        assert_eq!(opens, 1);
        assert_eq!(transport.state(), ConnectionState::Open);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn unanswered_ping_forces_reconnect() {
        // Server reads everything and never answers.
        let (url, _) = spawn_server(|ws| drain(ws)).await;

        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(
            TransportConfig {
                ping_interval_ms: 50,
                pong_timeout_ms: 100,
                reconnect_delay_ms: 10_000,
                ..config(url)
            },
            key(),
            bus,
        );
        transport.connect();

        let mut saw_timeout = false;
        let mut saw_close = false;
        loop {
            match next_event(&mut events).await {
                TransportEvent::Error(TransportError::HeartbeatTimeout { timeout_ms }) => {
                    assert_eq!(timeout_ms, 100);
                    saw_timeout = true;
                }
                TransportEvent::Close { code, reason } => {
                    assert_eq!(code, Some(PONG_TIMEOUT_CODE));
                    assert_eq!(reason, PONG_TIMEOUT_REASON);
                    saw_close = true;
                }
                TransportEvent::StateChanged {
                    to: ConnectionState::Reconnecting,
                    ..
                } => break,
                _ => {}
            }
        }
        assert!(saw_timeout && saw_close);
        assert_eq!(transport.state(), ConnectionState::Reconnecting);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn pong_replies_keep_connection_open() {
        let (url, _) = spawn_server(|mut ws| async move {
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    if text.contains("\"ping\"") {
                        let _ = ws.send(Message::Text(r#"{"type":"pong"}"#.into())).await;
                    }
                }
            }
        })
        .await;

        let bus = EventBus::new(256);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(
            TransportConfig {
                ping_interval_ms: 30,
                pong_timeout_ms: 150,
                ..config(url)
            },
            key(),
            bus,
        );
        transport.connect();
        wait_for_state(&transport, ConnectionState::Open).await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.state(), ConnectionState::Open);
        while let Some(ev) = events.try_recv() {
            assert!(!matches!(ev, TransportEvent::Error(_)), "unexpected {ev:?}");
        }

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn refused_connections_fail_terminally_once() {
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(config(refused_url().await), key(), bus);
        transport.connect();
        wait_for_state(&transport, ConnectionState::Failed).await;

        // Give a would-be ghost reconnect time to fire.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut connecting = 0;
        let mut failures = 0;
        let mut terminal = 0;
        while let Some(ev) = events.try_recv() {
            match ev {
                TransportEvent::StateChanged {
                    to: ConnectionState::Connecting,
                    ..
                } => connecting += 1,
                TransportEvent::Error(TransportError::ConnectionFailed(_)) => failures += 1,
                TransportEvent::Error(e) if e.is_terminal() => terminal += 1,
                _ => {}
            }
        }
        // Initial attempt plus two reconnects.
        assert_eq!(connecting, 3);
        assert_eq!(failures, 3);
        assert_eq!(terminal, 1);
        assert_eq!(transport.state(), ConnectionState::Failed);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn close_cancels_pending_reconnect() {
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(
            TransportConfig {
                reconnect_delay_ms: 150,
                max_reconnect_attempts: 10,
                ..config(refused_url().await)
            },
            key(),
            bus,
        );
        transport.connect();
        wait_for_state(&transport, ConnectionState::Reconnecting).await;

        transport.close();
        wait_for_state(&transport, ConnectionState::Closed).await;
        while events.try_recv().is_some() {}

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(transport.state(), ConnectionState::Closed);
        assert_eq!(events.try_recv(), None);

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn send_when_not_connected_reports_error() {
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let transport = Transport::spawn(config(refused_url().await), key(), bus);

        transport.send(WireMessage::ping());
        assert_eq!(
            next_event(&mut events).await,
            TransportEvent::Error(TransportError::NotConnected)
        );
        assert_eq!(transport.state(), ConnectionState::Idle);

        transport.shutdown().await;
    }
}
