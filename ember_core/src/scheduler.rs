//! Time sources used by the broker and the provider shim.
//!
//! Timers never call back into their owner. An expired approval timer only
//! pushes its request id into the expiry channel and the broker loop decides
//! what that means, so a timer racing a user decision can never resolve a
//! request twice.

use futures_util::future::{AbortHandle, LocalBoxFuture};
use std::time::Duration;
use tokio::sync::mpsc;

/// Sending half handed to a [`Scheduler`]; receives ids of expired requests.
pub type ExpirySender = mpsc::UnboundedSender<String>;
pub type ExpiryReceiver = mpsc::UnboundedReceiver<String>;

pub fn expiry_channel() -> (ExpirySender, ExpiryReceiver) {
    mpsc::unbounded_channel()
}

/// Cancellation handle of one armed timer. Dropping it does not cancel.
#[derive(Debug, Clone)]
pub struct TimeoutHandle(AbortHandle);

impl TimeoutHandle {
    pub fn new(handle: AbortHandle) -> Self {
        Self(handle)
    }

    /// Handle that is not attached to any timer.
    pub fn detached() -> Self {
        let (handle, _registration) = AbortHandle::new_pair();
        Self(handle)
    }

    pub fn cancel(&self) {
        self.0.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_aborted()
    }
}

/// Arms per-request expiry timers.
pub trait Scheduler {
    /// After `ttl`, deliver `request_id` to the expiry channel unless the
    /// returned handle was cancelled first.
    fn schedule(&self, request_id: &str, ttl: Duration) -> TimeoutHandle;
}

pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Future-returning sleep, used for client-side call timeouts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_marks_handle() {
        let handle = TimeoutHandle::detached();
        assert!(!handle.is_cancelled());
        handle.clone().cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
