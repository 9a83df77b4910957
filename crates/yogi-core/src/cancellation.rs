//! Cancellation primitive shared by every cancelable async operation
//! (`send_async`, `receive_async`, `await_event`, ...).
//!
//! Cancellation is cooperative: setting the flag never interrupts in-flight
//! work by itself, it only guarantees that the next time the owner checks
//! the token it observes the cancellation and can deliver `Canceled` to the
//! pending completion callback exactly once (§5, Testable property 7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct CancellationState {
    flag: AtomicBool,
}

/// A cheaply cloneable cancellation token.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Marks the token canceled. Returns `true` the first time it transitions,
    /// `false` on every subsequent call so callers can tell whether they were
    /// the one who triggered the cancellation.
    pub fn cancel(&self) -> bool {
        self.inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A timeout expressed as nanoseconds, per §5: `-1` is infinity, `0` is
/// "poll / try-only".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutNanos(i64);

impl TimeoutNanos {
    pub const INFINITE: TimeoutNanos = TimeoutNanos(-1);
    pub const TRY_ONLY: TimeoutNanos = TimeoutNanos(0);

    pub fn from_raw(nanos: i64) -> Result<Self, crate::YogiError> {
        if nanos < -1 {
            return Err(crate::YogiError::InvalidParam(format!(
                "timeout must be >= -1 nanoseconds, got {nanos}"
            )));
        }
        Ok(Self(nanos))
    }

    pub fn is_infinite(self) -> bool {
        self.0 == -1
    }

    pub fn is_try_only(self) -> bool {
        self.0 == 0
    }

    /// Converts to `std::time::Duration`, or `None` for infinite.
    pub fn to_duration(self) -> Option<std::time::Duration> {
        if self.is_infinite() {
            None
        } else {
            Some(std::time::Duration::from_nanos(self.0 as u64))
        }
    }
}
