//! Content-script bridge between one page and the broker.
//!
//! The relay never trusts what the page says about itself: every forwarded
//! message is re-stamped with the origin, favicon and title of the context
//! the relay runs in. Its tab cache only exists so a repeated connect can be
//! answered without a round trip, and may be dropped at any time.

use std::cell::RefCell;

use log::{debug, trace, warn};
use serde_json::{json, Value};

use crate::broker::BrokerChannel;
use crate::protocol::{BroadcastEvent, BrokerResponse, Envelope, MessageKind, RpcError};

/// Where relayed answers and events are posted (the page window).
pub trait PagePort {
    fn post(&self, envelope: &Envelope);
}

/// Identity of the page this relay serves, derived by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext {
    pub origin: String,
    /// First `<link rel="icon">` or `shortcut icon`, empty when absent.
    pub favicon: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabCache {
    pub site_connected: bool,
    pub site_accounts: Vec<String>,
    pub chain_id: Option<String>,
}

pub struct Relay<B, P> {
    broker: B,
    page: P,
    context: PageContext,
    cache: RefCell<TabCache>,
    // Page connect ids the broker deduplicated; settled by broadcast
    awaiting_connect: RefCell<Vec<String>>,
}

impl<B: BrokerChannel, P: PagePort> Relay<B, P> {
    pub fn new(broker: B, page: P, context: PageContext) -> Self {
        Self {
            broker,
            page,
            context,
            cache: RefCell::new(TabCache::default()),
            awaiting_connect: RefCell::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &PageContext {
        &self.context
    }

    pub fn cache(&self) -> TabCache {
        self.cache.borrow().clone()
    }

    /// A message observed on the page window. Anything that is not a page
    /// request with an id is ignored.
    pub async fn on_page_message(&self, raw: &Value) {
        let Some(envelope) = Envelope::from_value(raw) else {
            return;
        };
        if !envelope.kind.is_page_request() {
            trace!("Relay ignoring {} from page", envelope.kind);
            return;
        }
        let Some(id) = envelope.id.clone() else {
            trace!("Relay ignoring {} without id", envelope.kind);
            return;
        };

        // `eth_requestAccounts` sent as a raw request settles like a connect
        let asks_accounts = envelope.kind == MessageKind::Connect
            || (envelope.kind == MessageKind::Request && envelope.method.as_deref() == Some("eth_requestAccounts"));

        if asks_accounts {
            let cached = {
                let cache = self.cache.borrow();
                (cache.site_connected && !cache.site_accounts.is_empty()).then(|| cache.site_accounts.clone())
            };
            if let Some(accounts) = cached {
                debug!("Answering connect {} from tab cache", id);
                self.reply(&id, Ok(json!(accounts)));
                return;
            }
        }

        let stamped = envelope
            .with_origin(self.context.origin.clone())
            .with("favicon", self.context.favicon.clone())
            .with("title", self.context.title.clone());

        match self.broker.send(stamped).await {
            Err(e) => {
                warn!("Broker unreachable for {}: {}", id, e);
                self.reply(&id, Err(RpcError::transport(e)));
            }
            Ok(None) => {
                if asks_accounts {
                    debug!("Connect {} waiting on an existing approval", id);
                    self.awaiting_connect.borrow_mut().push(id);
                }
            }
            Ok(Some(response)) => {
                let outcome = self.outcome_of(asks_accounts, response);
                self.reply(&id, outcome);
            }
        }
    }

    fn outcome_of(&self, asks_accounts: bool, response: BrokerResponse) -> Result<Value, RpcError> {
        if let Some(state) = response.state.clone() {
            return serde_json::to_value(state.scoped_to(&self.context.origin))
                .map_err(|e| RpcError::internal_error_with(format!("Internal error: {}", e)));
        }
        let outcome = response.into_result();
        if asks_accounts {
            if let Ok(accounts) = &outcome {
                if let Ok(accounts) = serde_json::from_value::<Vec<String>>(accounts.clone()) {
                    let mut cache = self.cache.borrow_mut();
                    cache.site_connected = !accounts.is_empty();
                    cache.site_accounts = accounts;
                }
            }
        }
        outcome
    }

    /// A broadcast from the broker, addressed to every tab.
    pub fn on_broadcast(&self, raw: &Value) {
        let Some(event) = Envelope::from_value(raw).as_ref().and_then(BroadcastEvent::from_envelope) else {
            return;
        };
        if !event.concerns(&self.context.origin) {
            return;
        }

        match event {
            BroadcastEvent::ConnectionApproved { accounts, .. } => {
                {
                    let mut cache = self.cache.borrow_mut();
                    cache.site_connected = true;
                    cache.site_accounts = accounts.clone();
                }
                self.settle_awaiting(Ok(json!(accounts)));
                self.forward(BroadcastEvent::AccountsChanged { accounts });
            }
            BroadcastEvent::ConnectionRejected { error, .. } => {
                self.settle_awaiting(Err(error));
            }
            BroadcastEvent::Disconnected { .. } => {
                {
                    let mut cache = self.cache.borrow_mut();
                    cache.site_connected = false;
                    cache.site_accounts.clear();
                }
                self.forward(BroadcastEvent::Disconnected { origin: Some(self.context.origin.clone()) });
            }
            BroadcastEvent::ChainChanged { chain_id } => {
                self.cache.borrow_mut().chain_id = Some(chain_id.clone());
                self.forward(BroadcastEvent::ChainChanged { chain_id });
            }
            BroadcastEvent::AccountsChanged { accounts } => {
                // Unconnected pages never learn addresses
                if !self.cache.borrow().site_connected {
                    return;
                }
                self.cache.borrow_mut().site_accounts = accounts.clone();
                self.forward(BroadcastEvent::AccountsChanged { accounts });
            }
            BroadcastEvent::StateUpdate { state } => {
                let scoped = state.scoped_to(&self.context.origin);
                {
                    let mut cache = self.cache.borrow_mut();
                    cache.site_connected = scoped.is_connected(&self.context.origin);
                    cache.site_accounts = scoped.accounts.clone();
                    cache.chain_id = Some(scoped.selected_chain_id.clone());
                }
                self.forward(BroadcastEvent::StateUpdate { state: scoped });
            }
        }
    }

    fn settle_awaiting(&self, outcome: Result<Value, RpcError>) {
        let ids: Vec<String> = self.awaiting_connect.borrow_mut().drain(..).collect();
        for id in ids {
            self.reply(&id, outcome.clone());
        }
    }

    fn forward(&self, event: BroadcastEvent) {
        self.page.post(&event.to_envelope());
    }

    fn reply(&self, id: &str, outcome: Result<Value, RpcError>) {
        self.page.post(&Envelope::response(id, &outcome));
    }
}
