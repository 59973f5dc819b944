//! Connection manager: routing, registries, and conversation lifecycle.
//!
//! A [`Link`] owns the transport handle, a registry of identifier→mailbox
//! routes, and a registry of active conversations. A single router task
//! drains the transport's event stream, so inbound handling is strictly
//! serialized: each frame is parsed, its correlation identifier extracted,
//! and the frame delivered to that identifier's mailbox (created lazily, so
//! replies and unsolicited pushes both find a home).
//!
//! The registries are owned by the link — there is no process-wide state —
//! and every conversation's entry is created on start and torn down when its
//! scope exits, however it exits.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use parley_core::{ConvoId, LinkError, SocketState, wire};

use crate::config::LinkConfig;
use crate::convo::Convo;
use crate::mailbox::Mailbox;
use crate::timebox::{timebox, timebox_with};
use crate::transport::{LinkEvent, LinkEventKind, Transport, TungsteniteTransport};

/// Where an inbound frame is delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum RouteKey {
    /// Frames correlated to a conversation identifier.
    Convo(ConvoId),
    /// Frames with no extractable identifier — server pushes and the like.
    Unsolicited,
}

/// Registry record for one active conversation.
struct ConvoEntry {
    action: String,
    started_at: DateTime<Utc>,
}

struct LinkInner {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    routes: DashMap<RouteKey, Arc<Mailbox>>,
    convos: DashMap<ConvoId, ConvoEntry>,
    terminal: AtomicBool,
    router: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one correlated connection. Cheap to clone.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

/// Dial `url` and return a ready link.
pub async fn connect(url: &str, config: LinkConfig) -> Result<Link, LinkError> {
    let transport = TungsteniteTransport::connect(url).await?;
    let link = Link::with_transport(transport.clone(), config);
    // The pump was holding frames; the router is subscribed now.
    transport.start();
    Ok(link)
}

/// Build a link over a caller-supplied transport.
pub fn connect_with(transport: Arc<dyn Transport>, config: LinkConfig) -> Link {
    Link::with_transport(transport, config)
}

impl Link {
    fn with_transport(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        let inner = Arc::new(LinkInner {
            transport,
            config,
            routes: DashMap::new(),
            convos: DashMap::new(),
            terminal: AtomicBool::new(false),
            router: Mutex::new(None),
        });
        let handle = spawn_router(&inner);
        *inner.router.lock() = Some(handle);
        Self { inner }
    }

    /// Current socket state, mirrored from the transport.
    #[must_use]
    pub fn state(&self) -> SocketState {
        self.inner.transport.state()
    }

    /// Number of conversations currently in flight.
    #[must_use]
    pub fn convo_count(&self) -> usize {
        self.inner.convos.len()
    }

    /// The shared mailbox receiving identifier-less inbound traffic.
    #[must_use]
    pub fn unsolicited(&self) -> Arc<Mailbox> {
        self.inner.route_mailbox(RouteKey::Unsolicited)
    }

    pub(crate) fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Run one conversation: mint an identifier, hand the exchange a
    /// [`Convo`] bound to it, and tear everything down when the exchange's
    /// scope exits — by success, error, or cancellation.
    pub async fn convo<F, Fut, T>(&self, action: &str, exchange: F) -> Result<T, LinkError>
    where
        F: FnOnce(Convo) -> Fut,
        Fut: Future<Output = Result<T, LinkError>>,
    {
        let id = ConvoId::new();
        let mailbox = self.inner.register(id.clone(), action);
        let _guard = ConvoGuard {
            inner: Arc::clone(&self.inner),
            id: id.clone(),
        };
        tracing::debug!(convo_id = %id, action, "conversation started");

        let convo = Convo::new(self.clone(), id.clone(), action.to_owned(), mailbox);
        let result = exchange(convo).await;
        match &result {
            Ok(_) => tracing::debug!(convo_id = %id, action, "conversation finished"),
            Err(e) => tracing::warn!(convo_id = %id, action, error = %e, "conversation failed"),
        }
        result
    }

    /// Send an already-tagged frame, waiting out the handshake if needed.
    ///
    /// `Connecting` waits (bounded by `timeout`) for the `Open` transition;
    /// `Closing`/`Closed` fail immediately with
    /// [`LinkError::SocketUnavailable`].
    pub(crate) async fn send_payload(
        &self,
        frame: &Value,
        timeout: Duration,
    ) -> Result<(), LinkError> {
        let text = frame.to_string();
        match self.inner.transport.state() {
            SocketState::Connecting => {
                self.wait_for_open(timeout).await.inspect_err(|e| {
                    tracing::warn!(error = %e, "socket failed to open");
                })?;
                self.inner.transport.send(text).await
            }
            SocketState::Open => self.inner.transport.send(text).await,
            state @ (SocketState::Closing | SocketState::Closed) => {
                Err(LinkError::SocketUnavailable { state })
            }
        }
    }

    /// Timebox a one-shot wait for a named lifecycle event.
    ///
    /// The subscription lives inside the timeboxed future, so losing the race
    /// drops it — a late event cannot reach a caller that has given up.
    pub async fn wait_for_event(
        &self,
        kind: LinkEventKind,
        timeout: Duration,
    ) -> Result<LinkEvent, LinkError> {
        let mut rx = self.inner.transport.subscribe();
        timebox_with(
            timeout,
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if event.kind() == kind => return Ok(event),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "event wait lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(LinkError::Transport {
                                reason: "event stream ended".into(),
                            });
                        }
                    }
                }
            },
            move || tracing::debug!(event = %kind, "event wait abandoned"),
        )
        .await
    }

    /// Close the connection.
    ///
    /// Waits up to the configured grace period for the peer's close
    /// acknowledgement, then returns regardless.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), LinkError> {
        tracing::info!(code, reason, "closing link");
        self.inner.transport.close(code, reason.to_owned()).await?;
        if self.state() != SocketState::Closed {
            let _ = self
                .wait_for_event(LinkEventKind::Closed, self.inner.config.close_grace())
                .await;
        }
        Ok(())
    }

    /// Wait for the socket to leave `Connecting`, bounded by `timeout`.
    async fn wait_for_open(&self, timeout: Duration) -> Result<(), LinkError> {
        let mut rx = self.inner.transport.subscribe();
        // Re-check after subscribing: the transition may already have happened.
        match self.inner.transport.state() {
            SocketState::Open => return Ok(()),
            state @ (SocketState::Closing | SocketState::Closed) => {
                return Err(LinkError::SocketUnavailable { state });
            }
            SocketState::Connecting => {}
        }
        let transport = Arc::clone(&self.inner.transport);
        timebox(timeout, async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match event.kind() {
                        LinkEventKind::Open => return Ok(()),
                        LinkEventKind::Closed | LinkEventKind::Error => {
                            return Err(LinkError::SocketUnavailable {
                                state: SocketState::Closed,
                            });
                        }
                        LinkEventKind::Message => {}
                    },
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Missed events; trust the mirrored state instead.
                        match transport.state() {
                            SocketState::Open => return Ok(()),
                            state @ (SocketState::Closing | SocketState::Closed) => {
                                return Err(LinkError::SocketUnavailable { state });
                            }
                            SocketState::Connecting => {}
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(LinkError::Transport {
                            reason: "event stream ended".into(),
                        });
                    }
                }
            }
        })
        .await
    }
}

impl LinkInner {
    fn route_mailbox(&self, key: RouteKey) -> Arc<Mailbox> {
        Arc::clone(
            self.routes
                .entry(key)
                .or_insert_with(|| Arc::new(Mailbox::new()))
                .value(),
        )
    }

    fn register(&self, id: ConvoId, action: &str) -> Arc<Mailbox> {
        let mailbox = self.route_mailbox(RouteKey::Convo(id.clone()));
        let _ = self.convos.insert(
            id,
            ConvoEntry {
                action: action.to_owned(),
                started_at: Utc::now(),
            },
        );
        metrics::gauge!("parley_convos_active").increment(1.0);
        if self.terminal.load(Ordering::SeqCst) {
            // Connection already died; fail the conversation's reads fast.
            mailbox.close();
        }
        mailbox
    }

    fn deregister(&self, id: &ConvoId) {
        if let Some((_, entry)) = self.convos.remove(id) {
            metrics::gauge!("parley_convos_active").decrement(1.0);
            let elapsed_ms = (Utc::now() - entry.started_at).num_milliseconds();
            tracing::debug!(convo_id = %id, action = entry.action, elapsed_ms, "conversation deregistered");
        }
        if let Some((_, mailbox)) = self.routes.remove(&RouteKey::Convo(id.clone())) {
            mailbox.close();
        }
    }

    fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Open => tracing::debug!("socket open"),
            LinkEvent::Message(text) => self.route_frame(&text),
            LinkEvent::Closed { code, reason } => {
                tracing::info!(?code, reason, "socket closed");
                self.fail_all();
            }
            LinkEvent::Error(e) => {
                tracing::warn!(error = %e, "socket error");
                self.fail_all();
            }
        }
    }

    /// Deliver one inbound frame to the mailbox its identifier names.
    ///
    /// A frame that does not parse is logged and dropped here — one bad frame
    /// must not disturb routing for the conversations that are working.
    fn route_frame(&self, text: &str) {
        let parsed: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                let err = LinkError::Malformed {
                    reason: e.to_string(),
                };
                metrics::counter!("parley_frames_malformed").increment(1);
                tracing::warn!(error = %err, frame = %preview(text), "dropping malformed frame");
                return;
            }
        };
        let key = match wire::correlation_id(&parsed) {
            Some(id) => RouteKey::Convo(ConvoId::from(id)),
            None => {
                metrics::counter!("parley_frames_unsolicited").increment(1);
                RouteKey::Unsolicited
            }
        };
        self.route_mailbox(key).put(parsed);
        metrics::counter!("parley_frames_routed").increment(1);
    }

    /// The connection is gone: fail every registered mailbox. Idempotent.
    fn fail_all(&self) {
        if self.terminal.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in self.routes.iter() {
            entry.value().close();
        }
        tracing::info!(
            convos = self.convos.len(),
            "connection terminal, outstanding conversations failed"
        );
    }
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        if let Some(handle) = self.router.lock().take() {
            handle.abort();
        }
    }
}

/// Guarantees deregistration when a conversation's scope exits, even if the
/// exchange future is dropped mid-flight.
struct ConvoGuard {
    inner: Arc<LinkInner>,
    id: ConvoId,
}

impl Drop for ConvoGuard {
    fn drop(&mut self) {
        self.inner.deregister(&self.id);
    }
}

fn spawn_router(inner: &Arc<LinkInner>) -> JoinHandle<()> {
    let mut rx = inner.transport.subscribe();
    // The router must not keep the link alive; it exits when the link goes.
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.handle_event(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "router lagged behind the transport");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.fail_all();
                    }
                    break;
                }
            }
        }
    })
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
