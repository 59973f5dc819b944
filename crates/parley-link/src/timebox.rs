//! Deadline wrapper for asynchronous waits.
//!
//! Converts "wait forever" into "fail after N milliseconds": the pending
//! result races a timer, and exactly one outcome is ever produced. When the
//! timer wins, the losing future is dropped first — its completion can no
//! longer be observed — and then the registered side effect runs, so a
//! detached subscription or abandoned mailbox wait cannot fire late.

use std::future::Future;
use std::time::Duration;

use parley_core::LinkError;

/// Bound `fut` by `duration`.
///
/// If `fut` settles first its result (success or failure) propagates
/// unchanged. Otherwise fails with [`LinkError::Timeout`] carrying the
/// configured duration. A zero duration fails immediately unless `fut` is
/// already settled at its first poll.
pub async fn timebox<T, F>(duration: Duration, fut: F) -> Result<T, LinkError>
where
    F: Future<Output = Result<T, LinkError>>,
{
    timebox_with(duration, fut, || {}).await
}

/// [`timebox`] with a side effect that runs once if the timer wins.
///
/// The hook runs after the losing future has been dropped, so anything it
/// releases (an event subscription, a mailbox waiter slot) is already
/// detached from the race.
pub async fn timebox_with<T, F, C>(duration: Duration, fut: F, on_timeout: C) -> Result<T, LinkError>
where
    F: Future<Output = Result<T, LinkError>>,
    C: FnOnce(),
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_elapsed) => {
            on_timeout();
            Err(LinkError::Timeout {
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }
}
