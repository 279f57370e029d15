//! Gateway session state machine.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> AWAITING_HELLO -> IDENTIFYING -> READY
//!                     ^                                           |
//!                     +------ backoff <-- RECONNECTING | FAILED <-+
//! ```
//!
//! A [`Session`] owns one supervisor task. Each connection attempt runs
//! two tasks in a [`JoinSet`]: a reader that owns the stream half and
//! demultiplexes frames, and a writer that owns the sink half, fires the
//! heartbeat timer and serialises every outbound frame. The two talk over
//! an mpsc [`Control`] channel; nothing else is shared between them.
//!
//! Session state and the last heartbeat ack live in a `watch` channel so
//! readers (the pool, selection) never contend with the I/O tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use drawproxy_core::types::Timestamp;

use crate::client::{resume_url, GatewayClient, WsStream};
use crate::events::{GatewayEvent, GatewayEventHandler};
use crate::messages::{self, event_name, opcode, GatewayPayload};
use crate::reconnect::{sleep_or_cancel, Backoff, ReconnectConfig};

/// Default gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Default intents mask (guilds + guild messages).
pub const DEFAULT_INTENTS: u64 = 513;

/// Consecutive unacknowledged heartbeats that kill a connection.
pub const MAX_MISSED_ACKS: u32 = 2;

/// Bound on sending a close frame to a peer that may be hung.
const TRANSPORT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the per-connection control channel.
const CONTROL_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Ready,
    Reconnecting,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connecting => "CONNECTING",
            SessionState::AwaitingHello => "AWAITING_HELLO",
            SessionState::Identifying => "IDENTIFYING",
            SessionState::Ready => "READY",
            SessionState::Reconnecting => "RECONNECTING",
            SessionState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session, published on every change.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_heartbeat_ack: Option<Timestamp>,
    /// Number of connections that reached READY over the session's life.
    pub connections: u64,
    /// Message of the most recent connection failure.
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Disconnected,
            last_heartbeat_ack: None,
            connections: 0,
            last_error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config / errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub gateway_url: String,
    pub intents: u64,
    /// Bound on dialling plus receiving the hello frame.
    pub hello_timeout: Duration,
    /// Bound on receiving READY/RESUMED after identify/resume.
    pub ready_timeout: Duration,
    /// Bound on [`Session::close`] before the supervisor is abandoned.
    pub close_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            intents: DEFAULT_INTENTS,
            hello_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Session is not ready (state {0})")]
    NotReady(SessionState),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No hello received within {0:?}")]
    HelloTimeout(Duration),

    #[error("No ready event received within {0:?}")]
    ReadyTimeout(Duration),

    #[error("{0} consecutive heartbeats were not acknowledged")]
    HeartbeatTimeout(u32),

    #[error("Gateway invalidated the session (resumable: {resumable})")]
    InvalidSession { resumable: bool },

    #[error("Event handling panicked")]
    HandlerPanic,

    #[error("Session did not close within {0:?}")]
    CloseTimeout(Duration),
}

// ---------------------------------------------------------------------------
// Session handle
// ---------------------------------------------------------------------------

/// Handle to one worker's gateway session.
///
/// Dropping the handle does not stop the session; call [`Session::close`]
/// (or cancel the parent token passed to [`Session::spawn`]).
pub struct Session {
    worker_id: String,
    status: watch::Receiver<SessionStatus>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    close_timeout: Duration,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// State the supervisor shares with the handle.
struct Shared {
    status: watch::Sender<SessionStatus>,
    /// Writer channel of the current connection; `Some` only while READY.
    outbound: RwLock<Option<mpsc::Sender<Control>>>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        self.status.send_modify(|s| s.state = state);
    }
}

impl Session {
    /// Spawn the session supervisor; connecting starts immediately in
    /// the background.
    pub fn spawn(
        worker_id: impl Into<String>,
        credential: impl Into<String>,
        config: SessionConfig,
        handler: Arc<dyn GatewayEventHandler>,
        parent: &CancellationToken,
    ) -> Self {
        let worker_id = worker_id.into();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let shared = Arc::new(Shared {
            status: status_tx,
            outbound: RwLock::new(None),
        });
        let cancel = parent.child_token();
        let close_timeout = config.close_timeout;

        let supervisor = Supervisor {
            worker_id: worker_id.clone(),
            credential: credential.into(),
            config,
            handler,
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
            resume: None,
        };
        let handle = tokio::spawn(supervisor.run());

        Self {
            worker_id,
            status: status_rx,
            shared,
            cancel,
            close_timeout,
            supervisor: Mutex::new(Some(handle)),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> SessionState {
        self.status.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn last_heartbeat_ack(&self) -> Option<Timestamp> {
        self.status.borrow().last_heartbeat_ack
    }

    /// Watch channel of status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Queue an opaque frame for the remote side. Fails unless READY.
    pub async fn submit(&self, payload: serde_json::Value) -> Result<(), SessionError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(SessionError::NotReady(state));
        }
        let tx = self
            .shared
            .outbound
            .read()
            .await
            .clone()
            .ok_or(SessionError::NotReady(state))?;
        tx.send(Control::Send(payload.to_string()))
            .await
            .map_err(|_| SessionError::Transport("connection closed before send".into()))
    }

    /// Tear the session down.
    ///
    /// Returns once the transport and both connection tasks are gone. A
    /// supervisor that does not finish within the close timeout is
    /// aborted and reported as [`SessionError::CloseTimeout`].
    pub async fn close(&self) -> Result<(), SessionError> {
        self.cancel.cancel();
        let Some(mut handle) = self.supervisor.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.close_timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(worker_id = %self.worker_id, error = %e, "Session supervisor ended abnormally");
                self.shared.set_state(SessionState::Disconnected);
                Ok(())
            }
            Err(_) => {
                handle.abort();
                self.shared.set_state(SessionState::Disconnected);
                tracing::warn!(
                    worker_id = %self.worker_id,
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "Session did not close in time; abandoning",
                );
                Err(SessionError::CloseTimeout(self.close_timeout))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Resume token plus the last sequence seen on it.
#[derive(Debug, Clone)]
struct ResumeState {
    session_id: String,
    seq: u64,
    url: Option<String>,
}

/// Messages into a connection's writer task.
#[derive(Debug)]
enum Control {
    /// Heartbeat acknowledged.
    Ack,
    /// The gateway asked for an immediate heartbeat.
    HeartbeatNow,
    /// Latest dispatch sequence number.
    Sequence(u64),
    /// Raw outbound text frame.
    Send(String),
}

/// How one connection attempt ended.
#[derive(Debug)]
enum ConnectionEnd {
    /// The session is being closed.
    Cancelled,
    /// Lost after the handshake; try again (resuming when possible).
    Lost(String),
    /// The attempt failed outright.
    Failed(SessionError),
}

enum TaskExit {
    Reader {
        end: ConnectionEnd,
        resume: Option<ResumeState>,
    },
    Writer(ConnectionEnd),
}

struct Supervisor {
    worker_id: String,
    credential: String,
    config: SessionConfig,
    handler: Arc<dyn GatewayEventHandler>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    resume: Option<ResumeState>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        tracing::info!(worker_id = %self.worker_id, "Session started");

        loop {
            let mut reached_ready = false;
            let end = self.connect_once(&mut reached_ready).await;
            *self.shared.outbound.write().await = None;

            if reached_ready {
                backoff.reset();
                let resumable = self.resume.is_some() && !matches!(end, ConnectionEnd::Cancelled);
                let connection = self.shared.status.borrow().connections;
                self.notify(GatewayEvent::Disconnected { resumable, connection });
            }

            match end {
                ConnectionEnd::Cancelled => break,
                ConnectionEnd::Lost(reason) => {
                    tracing::warn!(
                        worker_id = %self.worker_id,
                        reason = %reason,
                        resumable = self.resume.is_some(),
                        "Gateway connection lost",
                    );
                    self.shared.status.send_modify(|s| {
                        s.state = SessionState::Reconnecting;
                        s.last_error = Some(reason);
                    });
                }
                ConnectionEnd::Failed(error) => {
                    tracing::error!(worker_id = %self.worker_id, error = %error, "Gateway connection failed");
                    self.shared.status.send_modify(|s| {
                        s.state = SessionState::Failed;
                        s.last_error = Some(error.to_string());
                    });
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(
                worker_id = %self.worker_id,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to gateway",
            );
            if !sleep_or_cancel(delay, &self.cancel).await {
                break;
            }
        }

        self.shared.set_state(SessionState::Disconnected);
        tracing::info!(worker_id = %self.worker_id, "Session stopped");
    }

    /// Run one connection from dial to teardown.
    async fn connect_once(&mut self, reached_ready: &mut bool) -> ConnectionEnd {
        self.shared.set_state(SessionState::Connecting);

        let url = match &self.resume {
            Some(ResumeState { url: Some(base), .. }) => resume_url(base, &self.config.gateway_url),
            _ => self.config.gateway_url.clone(),
        };
        let client = GatewayClient::new(self.worker_id.clone(), url);

        let handshake = tokio::select! {
            _ = self.cancel.cancelled() => return ConnectionEnd::Cancelled,
            result = tokio::time::timeout(self.config.hello_timeout, self.handshake(&client)) => result,
        };
        let (ws, interval) = match handshake {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return ConnectionEnd::Failed(e),
            Err(_) => return ConnectionEnd::Failed(SessionError::HelloTimeout(self.config.hello_timeout)),
        };

        self.shared.set_state(SessionState::Identifying);
        let (mut sink, stream) = ws.split();

        let hello_reply = match &self.resume {
            Some(r) => messages::resume(&self.credential, &r.session_id, r.seq),
            None => messages::identify(&self.credential, self.config.intents),
        };
        if let Err(e) = send_payload(&mut sink, &hello_reply).await {
            return ConnectionEnd::Failed(e);
        }

        let conn_cancel = self.cancel.child_token();
        let (ctrl_tx, ctrl_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let mut tasks = JoinSet::new();
        tasks.spawn(
            Reader {
                worker_id: self.worker_id.clone(),
                handler: Arc::clone(&self.handler),
                shared: Arc::clone(&self.shared),
                ctrl: ctrl_tx,
                cancel: conn_cancel.clone(),
                ready_timeout: self.config.ready_timeout,
                resume: self.resume.clone(),
            }
            .run(stream),
        );
        tasks.spawn(
            Writer {
                worker_id: self.worker_id.clone(),
                interval,
                cancel: conn_cancel.clone(),
            }
            .run(sink, ctrl_rx),
        );

        // The first task to finish decides how the connection ended.
        let mut end = None;
        let mut reader_done = false;
        while let Some(joined) = tasks.join_next().await {
            let exit_end = match joined {
                Ok(TaskExit::Reader { end, resume }) => {
                    self.resume = resume;
                    reader_done = true;
                    end
                }
                Ok(TaskExit::Writer(end)) => end,
                Err(e) => self.task_failure(e),
            };
            if end.is_none() {
                end = Some(exit_end);
                conn_cancel.cancel();
            }
        }
        if !reader_done {
            // Reader died without handing back its resume state.
            self.resume = None;
        }
        // Only the reader sets READY, and nothing has moved the state on yet.
        *reached_ready = self.shared.status.borrow().state == SessionState::Ready;

        let end = end.unwrap_or(ConnectionEnd::Cancelled);
        if self.cancel.is_cancelled() {
            ConnectionEnd::Cancelled
        } else {
            end
        }
    }

    /// Dial and wait for the hello frame.
    async fn handshake(&self, client: &GatewayClient) -> Result<(WsStream, Duration), SessionError> {
        let conn = client
            .connect()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        self.shared.set_state(SessionState::AwaitingHello);

        let mut ws = conn.ws_stream;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let payload = messages::parse_payload(&text)
                        .map_err(|e| SessionError::Protocol(format!("malformed hello: {e}")))?;
                    if payload.op != opcode::HELLO {
                        return Err(SessionError::Protocol(format!(
                            "expected hello, got opcode {}",
                            payload.op
                        )));
                    }
                    let hello = messages::parse_hello(&payload)
                        .map_err(|e| SessionError::Protocol(format!("malformed hello: {e}")))?;
                    if hello.heartbeat_interval == 0 {
                        return Err(SessionError::Protocol("zero heartbeat interval".into()));
                    }
                    return Ok((ws, Duration::from_millis(hello.heartbeat_interval)));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Err(SessionError::Transport(format!(
                        "closed before hello: {frame:?}"
                    )));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SessionError::Transport(e.to_string())),
                None => return Err(SessionError::Transport("stream ended before hello".into())),
            }
        }
    }

    fn task_failure(&self, error: JoinError) -> ConnectionEnd {
        if error.is_panic() {
            tracing::error!(worker_id = %self.worker_id, "Connection task panicked");
            ConnectionEnd::Failed(SessionError::HandlerPanic)
        } else {
            ConnectionEnd::Cancelled
        }
    }

    /// Deliver a supervisor-level event; a panicking handler is logged
    /// and otherwise ignored.
    fn notify(&self, event: GatewayEvent) {
        let handler = &self.handler;
        let worker_id = self.worker_id.as_str();
        if std::panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(worker_id, event))).is_err() {
            tracing::error!(worker_id = %self.worker_id, "Gateway event handler panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

struct Reader {
    worker_id: String,
    handler: Arc<dyn GatewayEventHandler>,
    shared: Arc<Shared>,
    ctrl: mpsc::Sender<Control>,
    cancel: CancellationToken,
    ready_timeout: Duration,
    resume: Option<ResumeState>,
}

/// What the reader should do after one frame.
enum Flow {
    Continue,
    Stop(ConnectionEnd),
}

impl Reader {
    async fn run(mut self, mut stream: SplitStream<WsStream>) -> TaskExit {
        let ready_deadline = Instant::now() + self.ready_timeout;
        let mut ready = false;

        let end = loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break ConnectionEnd::Cancelled,
                _ = tokio::time::sleep_until(ready_deadline), if !ready => {
                    break ConnectionEnd::Failed(SessionError::ReadyTimeout(self.ready_timeout));
                }
                frame = stream.next() => frame,
            };

            let text = match frame {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    break ConnectionEnd::Lost(format!("closed by gateway: {frame:?}"));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break ConnectionEnd::Lost(e.to_string()),
                None => break ConnectionEnd::Lost("stream ended".into()),
            };

            let payload = match messages::parse_payload(&text) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(worker_id = %self.worker_id, error = %e, "Undecodable gateway frame");
                    continue;
                }
            };

            match self.handle(payload, &mut ready).await {
                Flow::Continue => {}
                Flow::Stop(end) => break end,
            }
        };

        TaskExit::Reader {
            end,
            resume: self.resume,
        }
    }

    async fn handle(&mut self, payload: GatewayPayload, ready: &mut bool) -> Flow {
        match payload.op {
            opcode::DISPATCH => {
                if let Some(seq) = payload.s {
                    if let Some(resume) = self.resume.as_mut() {
                        resume.seq = seq;
                    }
                    let _ = self.ctrl.send(Control::Sequence(seq)).await;
                }
                self.dispatch(payload, ready).await;
                Flow::Continue
            }
            opcode::HEARTBEAT => {
                let _ = self.ctrl.send(Control::HeartbeatNow).await;
                Flow::Continue
            }
            opcode::HEARTBEAT_ACK => {
                let _ = self.ctrl.send(Control::Ack).await;
                self.shared
                    .status
                    .send_modify(|s| s.last_heartbeat_ack = Some(chrono::Utc::now()));
                Flow::Continue
            }
            opcode::RECONNECT => Flow::Stop(ConnectionEnd::Lost("gateway requested reconnect".into())),
            opcode::INVALID_SESSION => {
                let resumable = messages::invalid_session_resumable(&payload);
                if !resumable {
                    self.resume = None;
                }
                Flow::Stop(ConnectionEnd::Failed(SessionError::InvalidSession { resumable }))
            }
            other => {
                tracing::trace!(worker_id = %self.worker_id, op = other, "Ignoring gateway opcode");
                Flow::Continue
            }
        }
    }

    async fn dispatch(&mut self, payload: GatewayPayload, ready: &mut bool) {
        let Some(name) = payload.t.as_deref() else {
            return;
        };

        match name {
            event_name::READY => match messages::parse_ready(&payload) {
                Ok(data) => {
                    self.resume = Some(ResumeState {
                        session_id: data.session_id,
                        seq: payload.s.unwrap_or(0),
                        url: data.resume_gateway_url,
                    });
                    self.mark_ready(ready, false).await;
                }
                Err(e) => {
                    tracing::warn!(worker_id = %self.worker_id, error = %e, "Malformed READY; resume disabled");
                    self.resume = None;
                    self.mark_ready(ready, false).await;
                }
            },
            event_name::RESUMED => self.mark_ready(ready, true).await,
            _ => match messages::classify_dispatch(name, &payload.d) {
                Ok(Some(event)) => self.handler.on_event(&self.worker_id, event),
                Ok(None) => {
                    tracing::trace!(worker_id = %self.worker_id, event = name, "Ignoring dispatch");
                }
                Err(e) => {
                    tracing::warn!(worker_id = %self.worker_id, event = name, error = %e, "Undecodable dispatch");
                }
            },
        }
    }

    async fn mark_ready(&self, ready: &mut bool, resumed: bool) {
        if *ready {
            return;
        }
        *ready = true;
        *self.shared.outbound.write().await = Some(self.ctrl.clone());
        self.shared.status.send_modify(|s| {
            s.state = SessionState::Ready;
            s.connections += 1;
        });
        tracing::info!(worker_id = %self.worker_id, resumed, "Session ready");
        self.handler
            .on_event(&self.worker_id, GatewayEvent::Connected { resumed });
    }
}

// ---------------------------------------------------------------------------
// Writer / heartbeat
// ---------------------------------------------------------------------------

struct Writer {
    worker_id: String,
    interval: Duration,
    cancel: CancellationToken,
}

impl Writer {
    async fn run(
        self,
        mut sink: SplitSink<WsStream, Message>,
        mut ctrl: mpsc::Receiver<Control>,
    ) -> TaskExit {
        // Spread the first beat so many sessions sharing an interval do
        // not heartbeat in lockstep.
        let jitter: f64 = rand::rng().random_range(0.0..1.0);
        let mut next_beat = Instant::now() + self.interval.mul_f64(jitter);
        let mut seq: Option<u64> = None;
        let mut awaiting_ack = false;
        let mut missed = 0u32;

        let end = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break ConnectionEnd::Cancelled,
                _ = tokio::time::sleep_until(next_beat) => {
                    if awaiting_ack {
                        missed += 1;
                        tracing::warn!(worker_id = %self.worker_id, missed, "Heartbeat not acknowledged");
                        if missed >= MAX_MISSED_ACKS {
                            break ConnectionEnd::Lost(SessionError::HeartbeatTimeout(missed).to_string());
                        }
                    }
                    if let Err(e) = send_payload(&mut sink, &messages::heartbeat(seq)).await {
                        break ConnectionEnd::Lost(e.to_string());
                    }
                    awaiting_ack = true;
                    next_beat += self.interval;
                }
                msg = ctrl.recv() => match msg {
                    Some(Control::Ack) => {
                        awaiting_ack = false;
                        missed = 0;
                    }
                    Some(Control::HeartbeatNow) => {
                        if let Err(e) = send_payload(&mut sink, &messages::heartbeat(seq)).await {
                            break ConnectionEnd::Lost(e.to_string());
                        }
                    }
                    Some(Control::Sequence(s)) => seq = Some(s),
                    Some(Control::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            break ConnectionEnd::Lost(e.to_string());
                        }
                    }
                    None => break ConnectionEnd::Cancelled,
                },
            }
        };

        if tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT, sink.close()).await.is_err() {
            tracing::warn!(worker_id = %self.worker_id, "Transport close timed out");
        }
        TaskExit::Writer(end)
    }
}

async fn send_payload(
    sink: &mut SplitSink<WsStream, Message>,
    payload: &GatewayPayload,
) -> Result<(), SessionError> {
    let text = serde_json::to_string(payload).map_err(|e| SessionError::Protocol(e.to_string()))?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| SessionError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_text() {
        assert_eq!(SessionState::AwaitingHello.to_string(), "AWAITING_HELLO");
        let json = serde_json::to_value(SessionState::Ready).unwrap();
        assert_eq!(json, "READY");
    }

    #[test]
    fn default_status_is_disconnected() {
        let status = SessionStatus::default();
        assert_eq!(status.state, SessionState::Disconnected);
        assert!(status.last_heartbeat_ack.is_none());
    }

    #[test]
    fn default_config_matches_gateway_defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.intents, DEFAULT_INTENTS);
        assert_eq!(cfg.hello_timeout, Duration::from_secs(10));
        assert!(cfg.gateway_url.starts_with("wss://"));
    }
}
