use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::CoreError;
use crate::models::{origin_of, PendingRequest};
use crate::protocol::{BroadcastEvent, BrokerResponse};

/// Side effects the broker needs from the environment hosting it.
pub trait ExtensionHost {
    /// Fan an event out to every open tab. Delivery to each tab is
    /// independent; a failing tab must not stop the others.
    fn broadcast(&self, event: &BroadcastEvent);

    /// A request joined the approval queue. Raises a badge or notification,
    /// never opens a window on its own.
    fn notify_pending(&self, request: &PendingRequest, queue_len: usize);

    /// Queue length changed for any other reason.
    fn queue_changed(&self, _queue_len: usize) {}
}

/// What the runtime knows about who sent a message, independent of the
/// message body. Extension pages have no tab and no origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl SenderInfo {
    pub fn page(origin: impl Into<String>) -> Self {
        Self { origin: Some(origin.into()), ..Self::default() }
    }

    /// Sent from a web page (through a content script) rather than from a
    /// privileged extension context.
    pub fn is_page(&self) -> bool {
        self.tab_id.is_some() || self.origin.is_some() || self.url.is_some()
    }

    /// Runtime-derived origin, when the runtime supplied one.
    pub fn verified_origin(&self) -> Option<String> {
        self.origin
            .clone()
            .or_else(|| self.url.as_deref().and_then(origin_of))
    }
}

/// Outcome of handing one envelope to the broker.
#[derive(Debug)]
pub enum Reply {
    Now(BrokerResponse),
    /// Answer arrives once the user decides or the request expires.
    Later(DeferredReply),
    /// Nothing will be sent back for this message.
    Silent,
}

#[derive(Debug)]
pub struct DeferredReply {
    pub request_id: String,
    rx: oneshot::Receiver<BrokerResponse>,
}

impl DeferredReply {
    pub fn new(request_id: String, rx: oneshot::Receiver<BrokerResponse>) -> Self {
        Self { request_id, rx }
    }

    pub async fn wait(self) -> Result<BrokerResponse, CoreError> {
        self.rx
            .await
            .map_err(|_| CoreError::BrokerClosed(format!("request {} was dropped unanswered", self.request_id)))
    }
}

impl Reply {
    /// Resolve to the final answer, waiting on deferred replies.
    pub async fn settle(self) -> Result<Option<BrokerResponse>, CoreError> {
        match self {
            Reply::Now(response) => Ok(Some(response)),
            Reply::Later(deferred) => deferred.wait().await.map(Some),
            Reply::Silent => Ok(None),
        }
    }
}
