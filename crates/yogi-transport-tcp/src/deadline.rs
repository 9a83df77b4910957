//! Races a socket future against a timeout and a cooperative cancellation
//! token (§4.4: "a separate timer runs and cancels the socket on expiry").
//!
//! Cancellation has no waker of its own, so we recheck it on a short fixed
//! interval instead of subscribing to it; that trades a few milliseconds of
//! cancellation latency for not needing a second notification channel on
//! every socket op.

use std::future::Future;
use std::time::Duration;
use yogi_core::{Cancellation, TimeoutNanos, YogiError};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub async fn run_cancelable<F, T>(
    timeout: TimeoutNanos,
    cancellation: &Cancellation,
    fut: F,
) -> Result<T, YogiError>
where
    F: Future<Output = Result<T, YogiError>>,
{
    if cancellation.is_cancelled() {
        return Err(YogiError::Canceled);
    }

    tokio::pin!(fut);
    let sleep = match timeout.to_duration() {
        Some(d) => tokio::time::sleep(d),
        None => tokio::time::sleep(Duration::from_secs(u64::MAX / 2)),
    };
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;
            result = &mut fut => return result,
            _ = &mut sleep => return Err(YogiError::Timeout),
            _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {
                if cancellation.is_cancelled() {
                    return Err(YogiError::Canceled);
                }
            }
        }
    }
}
