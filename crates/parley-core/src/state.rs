//! Socket connection state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state mirrored from the underlying transport.
///
/// The link never drives these transitions itself; it observes them through
/// the transport's lifecycle events. Transitions run one way:
/// `Connecting → Open → Closing → Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketState {
    /// Handshake in progress; sends must wait for `Open`.
    Connecting,
    /// Fully established; sends go straight through.
    Open,
    /// A close has been initiated locally or remotely.
    Closing,
    /// Terminal. All outstanding conversations fail.
    Closed,
}

impl SocketState {
    /// Whether a send may still succeed (now or after the handshake).
    #[must_use]
    pub fn is_sendable(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Whether the socket has begun or finished shutting down.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}
