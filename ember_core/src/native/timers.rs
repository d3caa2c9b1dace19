// Tokio-backed timers for the native host

use crate::scheduler::{ExpirySender, Scheduler, Sleeper, TimeoutHandle};
use futures_util::future::{AbortHandle, Abortable, LocalBoxFuture};
use futures_util::FutureExt;
use log::trace;
use std::time::Duration;

/// Spawns one sleeping task per armed request. Must be used inside a tokio runtime.
pub struct TokioScheduler {
    expired: ExpirySender,
}

impl TokioScheduler {
    pub fn new(expired: ExpirySender) -> Self {
        Self { expired }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, request_id: &str, ttl: Duration) -> TimeoutHandle {
        let (handle, registration) = AbortHandle::new_pair();
        let expired = self.expired.clone();
        let id = request_id.to_string();
        let timer = async move {
            tokio::time::sleep(ttl).await;
            trace!("Approval timer fired for {}", id);
            // Broker gone means nobody is waiting anymore
            let _ = expired.send(id);
        };
        tokio::spawn(Abortable::new(timer, registration));
        TimeoutHandle::new(handle)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed_local()
    }
}
