//! Link configuration.
//!
//! Plain options struct — loading it from files or the environment is the
//! embedding application's business.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default deadline for a send (including any wait for the socket to open).
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;
/// Default deadline for `Convo::expect`.
pub const DEFAULT_EXPECT_TIMEOUT_MS: u64 = 5_000;
/// How long `Link::close` waits for the close handshake before giving up.
pub const DEFAULT_CLOSE_GRACE_MS: u64 = 1_000;

/// Timeouts governing link operations.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    /// Deadline for sends in ms (default: 5000).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Deadline for `expect` in ms (default: 5000).
    #[serde(default = "default_expect_timeout_ms")]
    pub expect_timeout_ms: u64,
    /// Close-handshake grace period in ms (default: 1000).
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

fn default_send_timeout_ms() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}
fn default_expect_timeout_ms() -> u64 {
    DEFAULT_EXPECT_TIMEOUT_MS
}
fn default_close_grace_ms() -> u64 {
    DEFAULT_CLOSE_GRACE_MS
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            expect_timeout_ms: DEFAULT_EXPECT_TIMEOUT_MS,
            close_grace_ms: DEFAULT_CLOSE_GRACE_MS,
        }
    }
}

impl LinkConfig {
    /// Send deadline as a [`Duration`].
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Expect deadline as a [`Duration`].
    #[must_use]
    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms)
    }

    /// Close grace period as a [`Duration`].
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}
