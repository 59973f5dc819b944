//! Error hierarchy for the Parley correlation layer.
//!
//! One enum covers every failure the layer can surface:
//!
//! - [`LinkError::Timeout`]: a bounded wait exceeded its deadline — always
//!   recoverable by the caller, never fatal to the connection
//! - [`LinkError::MailboxBusy`]: two concurrent readers on one conversation's
//!   inbound mailbox — a caller programming error
//! - [`LinkError::MailboxClosed`]: the conversation ended while a read was
//!   pending — recoverable, signals "give up on this exchange"
//! - [`LinkError::SocketUnavailable`]: send attempted while closing/closed
//! - [`LinkError::Malformed`]: inbound parse failure — contained at the
//!   routing layer (logged and dropped), never propagated across conversations
//! - [`LinkError::InvalidArgument`]: bad constructor/parameter usage
//! - [`LinkError::Transport`]: the underlying socket failed

use thiserror::Error;

use crate::state::SocketState;

/// Errors from correlation-layer operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A timeboxed wait exceeded its deadline.
    #[error("timed out after {duration_ms}ms")]
    Timeout {
        /// The configured deadline that was exceeded.
        duration_ms: u64,
    },

    /// A second `get` was attempted while one is already pending.
    #[error("mailbox already has a pending reader")]
    MailboxBusy,

    /// The mailbox was closed while (or before) a read was pending.
    #[error("mailbox closed")]
    MailboxClosed,

    /// A send was attempted on a socket that is shutting down.
    #[error("socket {state}, cannot send")]
    SocketUnavailable {
        /// The state the socket was in when the send was attempted.
        state: SocketState,
    },

    /// An inbound frame could not be parsed.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Why the frame was rejected.
        reason: String,
    },

    /// A parameter failed validation.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with it.
        reason: String,
    },

    /// The underlying transport failed.
    #[error("transport error: {reason}")]
    Transport {
        /// The transport's own description of the failure.
        reason: String,
    },
}

impl LinkError {
    /// Shorthand for a [`LinkError::Transport`] from any displayable error.
    #[must_use]
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            reason: err.to_string(),
        }
    }

    /// Whether the caller can sensibly retry or continue after this error.
    ///
    /// `MailboxBusy` and `InvalidArgument` are programming errors;
    /// everything else is an operational condition.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::MailboxBusy | Self::InvalidArgument { .. })
    }
}
