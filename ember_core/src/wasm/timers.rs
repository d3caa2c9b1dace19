// setTimeout-backed timers for the extension background and page contexts

use crate::scheduler::{ExpirySender, Scheduler, Sleeper, TimeoutHandle};
use futures_util::future::{AbortHandle, Abortable, LocalBoxFuture};
use futures_util::FutureExt;
use gloo_timers::future::sleep;
use log::trace;
use std::time::Duration;
use wasm_bindgen_futures::spawn_local;

pub struct BrowserScheduler {
    expired: ExpirySender,
}

impl BrowserScheduler {
    pub fn new(expired: ExpirySender) -> Self {
        Self { expired }
    }
}

impl Scheduler for BrowserScheduler {
    fn schedule(&self, request_id: &str, ttl: Duration) -> TimeoutHandle {
        let (handle, registration) = AbortHandle::new_pair();
        let expired = self.expired.clone();
        let id = request_id.to_string();
        let timer = async move {
            sleep(ttl).await;
            trace!("Approval timer fired for {}", id);
            let _ = expired.send(id);
        };
        spawn_local(Abortable::new(timer, registration).map(|_| ()));
        TimeoutHandle::new(handle)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserSleeper;

impl Sleeper for BrowserSleeper {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        sleep(duration).boxed_local()
    }
}
