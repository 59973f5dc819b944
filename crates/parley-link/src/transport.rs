//! Transport capability surface.
//!
//! The link consumes the WebSocket through a deliberately small trait:
//! current state, send, close, and a lifecycle event stream. Everything the
//! protocol layer does (framing, ping/pong, TLS) stays behind it.
//!
//! Event subscriptions are ordinary [`broadcast::Receiver`] values — dropping
//! one detaches it deterministically, which is what lets a timed-out wait
//! guarantee its subscription can never fire late.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parley_core::{LinkError, SocketState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How many lifecycle events may queue per subscriber before lagging.
const EVENT_BUFFER: usize = 256;
/// How many outbound commands may queue before senders wait.
const COMMAND_BUFFER: usize = 64;

/// A lifecycle or message event from the transport.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    /// The socket finished its handshake. Only emitted by transports that
    /// start in the `Connecting` state.
    Open,
    /// An inbound text frame.
    Message(String),
    /// The socket closed, with the peer's close code and reason if present.
    Closed {
        /// Close code from the close frame, if any.
        code: Option<u16>,
        /// Close reason from the close frame.
        reason: String,
    },
    /// The socket failed. Terminal, like `Closed`.
    Error(String),
}

impl LinkEvent {
    /// The event's kind, for subscription filtering.
    #[must_use]
    pub fn kind(&self) -> LinkEventKind {
        match self {
            Self::Open => LinkEventKind::Open,
            Self::Message(_) => LinkEventKind::Message,
            Self::Closed { .. } => LinkEventKind::Closed,
            Self::Error(_) => LinkEventKind::Error,
        }
    }
}

/// Discriminant of [`LinkEvent`], used to wait for a named event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEventKind {
    /// Socket opened.
    Open,
    /// Inbound frame.
    Message,
    /// Socket closed.
    Closed,
    /// Socket failed.
    Error,
}

impl std::fmt::Display for LinkEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Capability surface the link consumes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Current connection state.
    fn state(&self) -> SocketState;

    /// Send one text frame.
    async fn send(&self, text: String) -> Result<(), LinkError>;

    /// Initiate a close handshake with the given code and reason.
    async fn close(&self, code: u16, reason: String) -> Result<(), LinkError>;

    /// Subscribe to lifecycle events. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;
}

/// Reject URLs the WebSocket client cannot dial.
pub fn validate_ws_url(url: &str) -> Result<(), LinkError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(LinkError::InvalidArgument {
            reason: format!("expected a ws:// or wss:// URL, got {url:?}"),
        })
    }
}

// ─── Tungstenite transport ───────────────────────────────────────────────────

enum Command {
    Send {
        text: String,
        done: oneshot::Sender<Result<(), LinkError>>,
    },
    Close {
        code: u16,
        reason: String,
        done: oneshot::Sender<Result<(), LinkError>>,
    },
}

/// WebSocket transport over `tokio-tungstenite`.
///
/// One pump task owns the socket: it serializes outbound commands against the
/// inbound stream with `tokio::select!`, broadcasts inbound text frames as
/// [`LinkEvent::Message`], and mirrors the connection state for synchronous
/// reads. The pump holds all frames until [`TungsteniteTransport::start`] is
/// called, so a consumer can subscribe before the first message can arrive.
pub struct TungsteniteTransport {
    state: Arc<RwLock<SocketState>>,
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<LinkEvent>,
    go: Mutex<Option<oneshot::Sender<()>>>,
    _pump: JoinHandle<()>,
}

impl TungsteniteTransport {
    /// Dial `url` and spawn the pump (paused until [`Self::start`]).
    pub async fn connect(url: &str) -> Result<Arc<Self>, LinkError> {
        validate_ws_url(url)?;
        let (ws, _response) = connect_async(url).await.map_err(LinkError::transport)?;
        tracing::debug!(url, "websocket connected");

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (go_tx, go_rx) = oneshot::channel();
        let state = Arc::new(RwLock::new(SocketState::Open));
        let pump = tokio::spawn(pump_loop(
            ws,
            go_rx,
            cmd_rx,
            events.clone(),
            Arc::clone(&state),
        ));

        Ok(Arc::new(Self {
            state,
            cmd_tx,
            events,
            go: Mutex::new(Some(go_tx)),
            _pump: pump,
        }))
    }

    /// Release the pump. Idempotent.
    pub fn start(&self) {
        if let Some(go) = self.go.lock().take() {
            let _ = go.send(());
        }
    }

    async fn submit(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), LinkError>>) -> Command,
    ) -> Result<(), LinkError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.cmd_tx.send(make(done_tx)).await.map_err(|_| {
            // Pump gone means the socket is gone.
            LinkError::SocketUnavailable {
                state: SocketState::Closed,
            }
        })?;
        done_rx.await.map_err(|_| LinkError::SocketUnavailable {
            state: SocketState::Closed,
        })?
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    fn state(&self) -> SocketState {
        *self.state.read()
    }

    async fn send(&self, text: String) -> Result<(), LinkError> {
        self.submit(|done| Command::Send { text, done }).await
    }

    async fn close(&self, code: u16, reason: String) -> Result<(), LinkError> {
        self.submit(|done| Command::Close { code, reason, done })
            .await
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }
}

/// Socket pump: one task owns both halves of the stream.
async fn pump_loop(
    ws: WsStream,
    go: oneshot::Receiver<()>,
    mut cmd_rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<LinkEvent>,
    state: Arc<RwLock<SocketState>>,
) {
    // Hold all frames until the consumer has subscribed.
    if go.await.is_err() {
        return;
    }
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Send { text, done } => {
                        let result = ws_tx
                            .send(Message::Text(text.into()))
                            .await
                            .map_err(LinkError::transport);
                        let failed = result.is_err();
                        let _ = done.send(result);
                        if failed {
                            break;
                        }
                    }
                    Command::Close { code, reason, done } => {
                        *state.write() = SocketState::Closing;
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let result = ws_tx
                            .send(Message::Close(Some(frame)))
                            .await
                            .map_err(LinkError::transport);
                        let _ = done.send(result);
                        // Keep pumping until the peer acknowledges or the
                        // stream ends.
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(LinkEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.as_str().to_owned()),
                            None => (None, String::new()),
                        };
                        *state.write() = SocketState::Closed;
                        tracing::info!(?code, reason, "websocket closed by peer");
                        let _ = events.send(LinkEvent::Closed { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong handled by tungstenite; binary frames are
                        // not part of this protocol.
                    }
                    Some(Err(e)) => {
                        *state.write() = SocketState::Closed;
                        tracing::warn!(error = %e, "websocket stream error");
                        let _ = events.send(LinkEvent::Error(e.to_string()));
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    let already_closed = {
        let mut s = state.write();
        let was = *s == SocketState::Closed;
        *s = SocketState::Closed;
        was
    };
    if !already_closed {
        let _ = events.send(LinkEvent::Closed {
            code: None,
            reason: String::new(),
        });
    }
}

// ─── Test transport ──────────────────────────────────────────────────────────

/// Scripted in-memory transport for unit tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) struct FakeTransport {
        state: RwLock<SocketState>,
        events: broadcast::Sender<LinkEvent>,
        sent: Mutex<Vec<String>>,
        fail_sends: AtomicBool,
    }

    impl FakeTransport {
        pub(crate) fn new(initial: SocketState) -> Arc<Self> {
            let (events, _) = broadcast::channel(EVENT_BUFFER);
            Arc::new(Self {
                state: RwLock::new(initial),
                events,
                sent: Mutex::new(Vec::new()),
                fail_sends: AtomicBool::new(false),
            })
        }

        /// Finish the handshake: `Connecting → Open` plus an `Open` event.
        pub(crate) fn open(&self) {
            *self.state.write() = SocketState::Open;
            let _ = self.events.send(LinkEvent::Open);
        }

        /// Deliver an inbound text frame.
        pub(crate) fn push_text(&self, text: impl Into<String>) {
            let _ = self.events.send(LinkEvent::Message(text.into()));
        }

        /// Deliver an inbound JSON frame.
        pub(crate) fn push_json(&self, value: &Value) {
            self.push_text(value.to_string());
        }

        /// Drop the connection from the transport side.
        pub(crate) fn drop_connection(&self, code: u16, reason: &str) {
            *self.state.write() = SocketState::Closed;
            let _ = self.events.send(LinkEvent::Closed {
                code: Some(code),
                reason: reason.to_owned(),
            });
        }

        /// Make subsequent sends fail at the transport.
        pub(crate) fn set_fail_sends(&self, fail: bool) {
            self.fail_sends.store(fail, Ordering::SeqCst);
        }

        /// Frames sent so far, in order.
        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent.lock().clone()
        }

        /// Frames sent so far, parsed as JSON.
        pub(crate) fn sent_json(&self) -> Vec<Value> {
            self.sent()
                .iter()
                .map(|s| serde_json::from_str(s).expect("fake received non-JSON frame"))
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn state(&self) -> SocketState {
            *self.state.read()
        }

        async fn send(&self, text: String) -> Result<(), LinkError> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(LinkError::Transport {
                    reason: "scripted send failure".into(),
                });
            }
            self.sent.lock().push(text);
            Ok(())
        }

        async fn close(&self, code: u16, reason: String) -> Result<(), LinkError> {
            *self.state.write() = SocketState::Closed;
            let _ = self.events.send(LinkEvent::Closed {
                code: Some(code),
                reason,
            });
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
            self.events.subscribe()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn validate_accepts_ws_and_wss() {
        assert!(validate_ws_url("ws://localhost:9000").is_ok());
        assert!(validate_ws_url("wss://example.com/socket").is_ok());
    }

    #[test]
    fn validate_rejects_other_schemes() {
        let err = validate_ws_url("http://example.com").unwrap_err();
        assert_matches!(err, LinkError::InvalidArgument { .. });
        assert!(validate_ws_url("").is_err());
    }

    #[test]
    fn event_kinds() {
        assert_eq!(LinkEvent::Open.kind(), LinkEventKind::Open);
        assert_eq!(
            LinkEvent::Message("x".into()).kind(),
            LinkEventKind::Message
        );
        assert_eq!(
            LinkEvent::Closed {
                code: None,
                reason: String::new()
            }
            .kind(),
            LinkEventKind::Closed
        );
        assert_eq!(LinkEvent::Error("x".into()).kind(), LinkEventKind::Error);
    }

    #[tokio::test]
    async fn fake_transport_records_sends() {
        let fake = fake::FakeTransport::new(SocketState::Open);
        fake.send("one".into()).await.unwrap();
        fake.send("two".into()).await.unwrap();
        assert_eq!(fake.sent(), vec!["one".to_owned(), "two".to_owned()]);
    }

    #[tokio::test]
    async fn fake_transport_close_broadcasts() {
        let fake = fake::FakeTransport::new(SocketState::Open);
        let mut rx = fake.subscribe();
        fake.close(1000, "done".into()).await.unwrap();
        assert_eq!(fake.state(), SocketState::Closed);
        let event = rx.recv().await.unwrap();
        assert_matches!(event, LinkEvent::Closed { code: Some(1000), reason } if reason == "done");
    }

    #[tokio::test]
    async fn fake_transport_open_transitions() {
        let fake = fake::FakeTransport::new(SocketState::Connecting);
        let mut rx = fake.subscribe();
        assert_eq!(fake.state(), SocketState::Connecting);
        fake.open();
        assert_eq!(fake.state(), SocketState::Open);
        assert_matches!(rx.recv().await.unwrap(), LinkEvent::Open);
    }
}
