use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::events::{OutboundMessage, ServerId, WireError};
use crate::engine::reconciler::LiveState;
use crate::engine::validation::validate_chat_message;

/// Keep-alive period while connected.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(40);
/// Silence tolerated from the peer before the connection is considered dead.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(120);
/// Maximum queued outbound messages per connection.
pub const MAX_OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Set by the owner between a lost connection and the next attempt.
    Reconnecting,
}

/// Why a connection lifetime ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// [`ConnectionHandle::disconnect`] was called.
    Requested,
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// Nothing was received within the liveness timeout.
    LivenessTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("invalid chat message: {0}")]
    InvalidMessage(String),
    #[error("not connected to the live feed")]
    NotConnected,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection has been dropped")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub url: String,
    pub heartbeat_interval: Duration,
    /// `None` disables liveness detection.
    pub liveness_timeout: Option<Duration>,
    pub outbound_queue: usize,
}

impl LiveSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            liveness_timeout: Some(LIVENESS_TIMEOUT),
            outbound_queue: MAX_OUTBOUND_QUEUE,
        }
    }
}

/// Owns the live feed socket. Drives one connection lifetime per [`run`](Self::run)
/// call; reconnecting is the caller's decision.
pub struct LiveConnection {
    settings: LiveSettings,
    outbound: mpsc::Receiver<OutboundMessage>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

/// Cheap, cloneable control surface for a [`LiveConnection`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<OutboundMessage>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl LiveConnection {
    pub fn new(settings: LiveSettings) -> (Self, ConnectionHandle) {
        let (out_tx, out_rx) = mpsc::channel(settings.outbound_queue.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let handle = ConnectionHandle {
            outbound: out_tx,
            state: state_rx,
            cancel: cancel.clone(),
        };
        let conn = Self {
            settings,
            outbound: out_rx,
            state: state_tx,
            cancel,
        };
        (conn, handle)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Publish that the owner is about to retry.
    pub fn mark_reconnecting(&self) {
        self.state.send_replace(ConnectionState::Reconnecting);
    }

    /// Connect, then apply inbound events to `live` until the connection ends.
    pub async fn run(&mut self, live: &mut LiveState) -> Result<CloseReason, ConnectionError> {
        if self.cancel.is_cancelled() {
            self.state.send_replace(ConnectionState::Disconnected);
            return Ok(CloseReason::Requested);
        }

        self.state.send_replace(ConnectionState::Connecting);
        let result = self.session(live).await;
        self.state.send_replace(ConnectionState::Disconnected);

        // Anything queued for this lifetime is stale now.
        while self.outbound.try_recv().is_ok() {}

        match &result {
            Ok(reason) => info!(?reason, "live feed connection ended"),
            Err(e) => warn!(error = %e, "live feed connection failed"),
        }
        result
    }

    async fn session(&mut self, live: &mut LiveState) -> Result<CloseReason, ConnectionError> {
        debug!(url = %self.settings.url, "connecting to live feed");
        let (ws, _) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(CloseReason::Requested),
            res = tokio_tungstenite::connect_async(self.settings.url.as_str()) => res?,
        };
        self.state.send_replace(ConnectionState::Connected);
        info!(url = %self.settings.url, "live feed connected");

        let (mut sink, mut stream) = ws.split();

        let period = self.settings.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_seen = Instant::now();

        loop {
            let deadline = self.settings.liveness_timeout.map(|t| last_seen + t);

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(CloseReason::Requested);
                }
                frame = stream.next() => {
                    let Some(frame) = frame else {
                        return Ok(CloseReason::PeerClosed);
                    };
                    last_seen = Instant::now();
                    match frame? {
                        WsMessage::Text(text) => apply_frame(live, &text),
                        WsMessage::Close(frame) => {
                            debug!(?frame, "live feed closed by peer");
                            return Ok(CloseReason::PeerClosed);
                        }
                        _ => {}
                    }
                }
                _ = heartbeat.tick() => {
                    // The protocol ping is not answered; the frame-level ping is,
                    // and its pong refreshes `last_seen`.
                    sink.send(WsMessage::Text(OutboundMessage::ping().encode()?)).await?;
                    sink.send(WsMessage::Ping(Vec::new())).await?;
                    debug!("heartbeat sent");
                }
                Some(msg) = self.outbound.recv() => {
                    sink.send(WsMessage::Text(msg.encode()?)).await?;
                }
                _ = wait_until(deadline) => {
                    warn!(timeout = ?self.settings.liveness_timeout, "live feed went silent, closing");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ok(CloseReason::LivenessTimeout);
                }
            }
        }
    }
}

fn apply_frame(live: &mut LiveState, text: &str) {
    if let Err(e) = live.apply_frame(text) {
        warn!(error = %e, "skipping malformed live frame");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl ConnectionHandle {
    /// Queue a chat line for a game server.
    pub fn send_chat(&self, server_id: ServerId, message: &str) -> Result<(), ConnectionError> {
        validate_chat_message(message).map_err(ConnectionError::InvalidMessage)?;
        self.send(OutboundMessage::chat(server_id, message))
    }

    /// Queue a raw outbound message. Fails unless currently connected.
    pub fn send(&self, msg: OutboundMessage) -> Result<(), ConnectionError> {
        if self.state() != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        self.outbound.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::QueueFull,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Ask the connection to close. Permanent for this connection.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    pub fn is_disconnect_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` unless a disconnect is requested first, in which case it is
    /// dropped and `None` is returned.
    pub async fn unless_disconnected<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection publishes `target`. Returns false if the
    /// connection was dropped first.
    pub async fn wait_for_state(&mut self, target: ConnectionState) -> bool {
        self.state.wait_for(|s| *s == target).await.is_ok()
    }
}
