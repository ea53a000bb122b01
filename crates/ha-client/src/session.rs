//! Connection Session: owns the single WebSocket connection to the
//! home-automation hub's event bus, from initial connect through the
//! auth/subscribe handshake to steady-state event delivery, and reconnects
//! on any failure.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ha_protocol::hub::{AuthRequest, HubFrame, Ping, Pong, SubscribeEvents};
use ha_protocol::model::RawEvent;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffConfig};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Delay between receiving `subscribe_ok` and reporting `Subscribed`, to let
/// the peer finish setting up the subscription before steady-state traffic
/// is expected.
const SUBSCRIBE_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// How long a connection must stay `Subscribed` before the reconnect backoff
/// counter is considered stable again and reset to its initial delay.
const STABLE_CONNECTION_RESET: Duration = Duration::from_secs(60);

/// Lifecycle states of the hub connection, reported to the health roll-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Subscribed,
    Reconnecting,
    Stopped,
}

impl SessionState {
    pub fn is_up(self) -> bool {
        matches!(self, SessionState::Subscribed)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub hub_url: String,
    pub access_token: String,
    pub event_type: String,
    /// How long to wait for a `Ping` before treating the connection as dead.
    pub keepalive_timeout: Duration,
    pub backoff: BackoffConfig,
}

/// Owns the connection lifecycle. `run` never returns except on shutdown;
/// failures are handled internally by reconnecting.
pub struct ConnectionSession {
    cfg: ClientConfig,
    events_tx: mpsc::Sender<RawEvent>,
    state_tx: watch::Sender<SessionState>,
}

impl ConnectionSession {
    pub fn new(
        cfg: ClientConfig,
        events_tx: mpsc::Sender<RawEvent>,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        (
            ConnectionSession {
                cfg,
                events_tx,
                state_tx,
            },
            state_rx,
        )
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }

    fn token_fingerprint(&self) -> String {
        let digest = Sha256::digest(self.cfg.access_token.as_bytes());
        hex::encode(digest)[..12].to_owned()
    }

    /// Run the connect/subscribe/serve loop until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut backoff = Backoff::new(self.cfg.backoff);

        loop {
            if shutdown.try_recv().is_ok() {
                self.set_state(SessionState::Stopped);
                return;
            }

            self.set_state(SessionState::Connecting);
            match self.connect_and_serve(&mut shutdown, &mut backoff).await {
                Ok(ShutdownRequested) => {
                    self.set_state(SessionState::Stopped);
                    return;
                }
                Err(err) => {
                    warn!(
                        token_fingerprint = %self.token_fingerprint(),
                        error = %err,
                        "hub session ended, reconnecting"
                    );
                    self.set_state(SessionState::Reconnecting);
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut shutdown => {
                            self.set_state(SessionState::Stopped);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn connect_and_serve(
        &mut self,
        shutdown: &mut oneshot::Receiver<()>,
        backoff: &mut Backoff,
    ) -> Result<ShutdownRequested, SessionError> {
        self.set_state(SessionState::Connecting);
        let mut ws = self.connect().await?;

        self.set_state(SessionState::Authenticating);
        self.authenticate(&mut ws).await?;

        self.set_state(SessionState::Subscribing);
        self.subscribe(&mut ws).await?;

        // The subscribe_ok frame confirms the subscription request was
        // received, not that the peer has finished setting it up; wait out
        // the settle delay before treating the connection as steady-state.
        tokio::select! {
            _ = tokio::time::sleep(SUBSCRIBE_SETTLE_DELAY) => {}
            _ = &mut *shutdown => return Ok(ShutdownRequested),
        }

        self.set_state(SessionState::Subscribed);
        info!(
            token_fingerprint = %self.token_fingerprint(),
            "hub session subscribed"
        );

        self.serve(&mut ws, shutdown, backoff).await
    }

    async fn connect(&self) -> Result<WsStream, SessionError> {
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let request = self
            .cfg
            .hub_url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        Ok(ws)
    }

    async fn authenticate(&self, ws: &mut WsStream) -> Result<(), SessionError> {
        let auth = HubFrame::AuthRequest(AuthRequest {
            access_token: self.cfg.access_token.clone(),
        });
        send_frame(ws, &auth).await?;

        match recv_frame(ws).await? {
            HubFrame::AuthAccepted(_) => Ok(()),
            HubFrame::AuthRejected(rejected) => Err(SessionError::AuthRejected(rejected.message)),
            other => Err(SessionError::Protocol(format!(
                "expected auth_accepted, got {other:?}"
            ))),
        }
    }

    async fn subscribe(&self, ws: &mut WsStream) -> Result<(), SessionError> {
        let subscribe = HubFrame::SubscribeEvents(SubscribeEvents {
            id: 1,
            event_type: self.cfg.event_type.clone(),
        });
        send_frame(ws, &subscribe).await?;

        match recv_frame(ws).await? {
            HubFrame::SubscribeOk(ok) if ok.id == 1 => Ok(()),
            other => Err(SessionError::Protocol(format!(
                "expected subscribe_ok, got {other:?}"
            ))),
        }
    }

    /// Steady-state loop: forward events into the bounded channel, answer
    /// keepalive pings, and detect a stalled connection. Also resets the
    /// reconnect backoff counter once the connection has been up for
    /// `STABLE_CONNECTION_RESET`, per spec.md's "counter resets after 60s of
    /// Subscribed".
    async fn serve(
        &mut self,
        ws: &mut WsStream,
        shutdown: &mut oneshot::Receiver<()>,
        backoff: &mut Backoff,
    ) -> Result<ShutdownRequested, SessionError> {
        let stable_reset = tokio::time::sleep(STABLE_CONNECTION_RESET);
        tokio::pin!(stable_reset);
        let mut backoff_reset = false;

        loop {
            tokio::select! {
                frame = tokio::time::timeout(self.cfg.keepalive_timeout, recv_frame(ws)) => {
                    let frame = frame.map_err(|_| SessionError::KeepaliveTimeout)??;
                    match frame {
                        HubFrame::Event(ev) => {
                            // Backpressure: this blocks the read loop when the
                            // Normalizer's inbound channel is full, which is
                            // the intended propagation point per the pipeline's
                            // single backpressure chain.
                            if self.events_tx.send(ev.event).await.is_err() {
                                return Err(SessionError::Protocol(
                                    "normalizer channel closed".to_owned(),
                                ));
                            }
                        }
                        HubFrame::Ping(Ping { id }) => {
                            send_frame(ws, &HubFrame::Pong(Pong { id })).await?;
                        }
                        HubFrame::Error(err) => {
                            return Err(SessionError::Protocol(format!(
                                "{}: {}",
                                err.code, err.message
                            )));
                        }
                        other => {
                            debug!(frame = ?other, "ignoring unexpected frame in steady state");
                        }
                    }
                }
                () = &mut stable_reset, if !backoff_reset => {
                    backoff.reset();
                    backoff_reset = true;
                    debug!("connection stable for 60s, reconnect backoff reset");
                }
                _ = &mut *shutdown => {
                    return Ok(ShutdownRequested);
                }
            }
        }
    }
}

struct ShutdownRequested;

async fn send_frame(ws: &mut WsStream, frame: &HubFrame) -> Result<(), SessionError> {
    let json = serde_json::to_string(frame).map_err(|e| SessionError::Serialization(e.to_string()))?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| SessionError::Ws(e.to_string()))
}

async fn recv_frame(ws: &mut WsStream) -> Result<HubFrame, SessionError> {
    loop {
        match ws.next().await {
            None => return Err(SessionError::Disconnected),
            Some(Err(e)) => return Err(SessionError::Ws(e.to_string())),
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(&text)
                    .map_err(|e| SessionError::Protocol(format!("JSON parse: {e}")));
            }
            Some(Ok(Message::Close(_))) => return Err(SessionError::Disconnected),
            Some(Ok(Message::Ping(data))) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Some(Ok(_)) => continue,
        }
    }
}

#[derive(Debug)]
pub enum SessionError {
    Connect(String),
    Ws(String),
    Protocol(String),
    Serialization(String),
    AuthRejected(String),
    KeepaliveTimeout,
    Disconnected,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Connect(s) => write!(f, "connect error: {s}"),
            SessionError::Ws(s) => write!(f, "websocket error: {s}"),
            SessionError::Protocol(s) => write!(f, "protocol error: {s}"),
            SessionError::Serialization(s) => write!(f, "serialization error: {s}"),
            SessionError::AuthRejected(s) => write!(f, "authentication rejected: {s}"),
            SessionError::KeepaliveTimeout => write!(f, "keepalive timeout: no frame from hub"),
            SessionError::Disconnected => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_up_true_only_when_subscribed() {
        assert!(SessionState::Subscribed.is_up());
        assert!(!SessionState::Reconnecting.is_up());
        assert!(!SessionState::Authenticating.is_up());
    }
}
