//! Single-slot async handoff queue.
//!
//! One [`Mailbox`] exists per conversation identifier. Messages that arrive
//! before anyone asks for them queue up in a FIFO backlog; at most one reader
//! may wait for the next message at a time. Each identifier has exactly one
//! logical reader (the task driving that exchange), so a second concurrent
//! reader is a programming error, not a transient condition.
//!
//! The handoff itself is a [`tokio::sync::oneshot`] channel: sending consumes
//! the sender, so a waiter can only ever be settled once.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use parley_core::LinkError;

type Waiter = oneshot::Sender<Result<Value, LinkError>>;

#[derive(Default)]
struct State {
    backlog: VecDeque<Value>,
    waiter: Option<Waiter>,
    closed: bool,
}

/// FIFO queue with at most one outstanding reader.
///
/// Invariant: the backlog and a live waiter are never both non-empty — while
/// a reader waits, the next `put` hands the message straight to it.
#[derive(Default)]
pub struct Mailbox {
    state: Mutex<State>,
}

impl Mailbox {
    /// Create an empty, open mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message.
    ///
    /// Hands it directly to a waiting reader if there is one, otherwise
    /// appends it to the backlog. Never blocks, never fails. If the waiting
    /// reader abandoned its wait (its receiver is gone), the message is
    /// reclaimed into the backlog rather than lost. On a closed mailbox the
    /// message is dropped.
    pub fn put(&self, item: Value) {
        let mut state = self.state.lock();
        if state.closed {
            tracing::debug!("mailbox closed, dropping message");
            return;
        }
        if let Some(waiter) = state.waiter.take() {
            if let Err(returned) = waiter.send(Ok(item)) {
                if let Ok(item) = returned {
                    state.backlog.push_back(item);
                }
            }
        } else {
            state.backlog.push_back(item);
        }
    }

    /// Take the next message, waiting if none has arrived yet.
    ///
    /// Returns immediately from the backlog when it is non-empty (the backlog
    /// drains even after `close`). Fails immediately with
    /// [`LinkError::MailboxBusy`] if another reader is already waiting, and
    /// with [`LinkError::MailboxClosed`] once the mailbox is closed and empty.
    pub async fn get(&self) -> Result<Value, LinkError> {
        let rx = {
            let mut state = self.state.lock();
            if let Some(item) = state.backlog.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(LinkError::MailboxClosed);
            }
            if let Some(waiter) = &state.waiter {
                if !waiter.is_closed() {
                    return Err(LinkError::MailboxBusy);
                }
                // Previous reader abandoned its wait; the slot is dead.
            }
            let (tx, rx) = oneshot::channel();
            state.waiter = Some(tx);
            rx
        };
        match rx.await {
            Ok(result) => result,
            // Sender dropped without settling: the mailbox itself was dropped.
            Err(_) => Err(LinkError::MailboxClosed),
        }
    }

    /// Close the mailbox.
    ///
    /// Fails a pending reader with [`LinkError::MailboxClosed`]; harmless when
    /// no reader is pending. Idempotent. Later messages are dropped and later
    /// `get` calls fail once the backlog is drained.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(Err(LinkError::MailboxClosed));
        }
    }

    /// Clear an abandoned waiter slot.
    ///
    /// Used as the timeout side effect by `Convo::expect`: once the waiting
    /// future is dropped its receiver is gone, and this reaps the dead sender
    /// so the slot cannot linger. A live waiter is left alone.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if state.waiter.as_ref().is_some_and(Waiter::is_closed) {
            state.waiter = None;
        }
    }

    /// Number of messages waiting in the backlog.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Whether the mailbox has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
