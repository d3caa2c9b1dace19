// Broadcast fan-out for the native host: every event goes to the SSE subscribers

use ember_core::{BroadcastEvent, ExtensionHost, PendingRequest};
use log::{debug, info};
use tokio::sync::broadcast;

pub struct ChannelHost {
    events: broadcast::Sender<BroadcastEvent>,
}

impl ChannelHost {
    pub fn new(events: broadcast::Sender<BroadcastEvent>) -> Self {
        Self { events }
    }
}

impl ExtensionHost for ChannelHost {
    fn broadcast(&self, event: &BroadcastEvent) {
        // No subscriber is fine
        let receivers = self.events.send(event.clone()).unwrap_or(0);
        debug!("Broadcast {} to {} subscriber(s)", event.kind(), receivers);
    }

    fn notify_pending(&self, request: &PendingRequest, queue_len: usize) {
        info!(
            "Approval needed: {:?} {} from {} ({} queued)",
            request.kind, request.id, request.origin, queue_len
        );
    }

    fn queue_changed(&self, queue_len: usize) {
        debug!("Approval queue now holds {}", queue_len);
    }
}
