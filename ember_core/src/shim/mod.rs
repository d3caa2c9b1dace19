//! In-page provider: the EIP-1193 style object page scripts talk to.
//!
//! Every call becomes one envelope posted to the relay with a unique id and
//! one entry in the in-flight table. The entry is removed when the answer
//! arrives or when the client-side timeout fires, whichever is first.

mod events;
mod registry;

pub use events::{EventEmitter, Listener, RustListener, ACCOUNTS_CHANGED, CHAIN_CHANGED, DISCONNECT};
pub use registry::{ProviderInfo, ProviderRegistry};

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::{join_all, select, Either};
use log::{debug, trace};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::models::{AccountsView, StateSnapshot};
use crate::protocol::{Envelope, MessageKind, RpcError};
use crate::scheduler::Sleeper;

/// Where the provider posts its envelopes (the page window, towards the relay).
pub trait PageTransport {
    fn post(&self, envelope: &Envelope);
}

/// Argument of `request()`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestArguments {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Vec<Value>>,
}

impl RequestArguments {
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        Self { method: Some(method.to_string()), params: Some(params) }
    }
}

type InFlight = HashMap<String, oneshot::Sender<Result<Value, RpcError>>>;

pub struct Provider<T, S, L> {
    transport: T,
    sleeper: S,
    timeout: Duration,
    view: RefCell<AccountsView>,
    in_flight: RefCell<InFlight>,
    events: RefCell<EventEmitter<L>>,
}

impl<T: PageTransport, S: Sleeper, L: Listener> Provider<T, S, L> {
    pub fn new(transport: T, sleeper: S, timeout: Duration) -> Self {
        Self {
            transport,
            sleeper,
            timeout,
            view: RefCell::new(AccountsView::default()),
            in_flight: RefCell::new(HashMap::new()),
            events: RefCell::new(EventEmitter::default()),
        }
    }

    pub fn view(&self) -> AccountsView {
        self.view.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.view.borrow().connected
    }

    pub fn selected_address(&self) -> Option<String> {
        self.view.borrow().primary_address().map(str::to_string)
    }

    pub fn chain_id(&self) -> Option<String> {
        self.view.borrow().chain_id.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.borrow().len()
    }

    pub async fn request(&self, args: RequestArguments) -> Result<Value, RpcError> {
        let Some(method) = args.method.filter(|m| !m.is_empty()) else {
            return Err(RpcError::invalid_params("Missing method"));
        };
        let params = args.params.unwrap_or_default();

        match method.as_str() {
            "eth_requestAccounts" => {
                let cached = self.view.borrow().accounts.clone();
                if !cached.is_empty() {
                    return Ok(json!(cached));
                }
                let result = self.call(Envelope::new(MessageKind::Connect)).await?;
                let accounts: Vec<String> = serde_json::from_value(result.clone())
                    .map_err(|e| RpcError::internal_error_with(format!("Malformed accounts: {}", e)))?;
                self.view.borrow_mut().replace_accounts(accounts);
                Ok(result)
            }
            "eth_accounts" => {
                let view = self.view.borrow();
                let accounts = if view.connected { view.accounts.clone() } else { Vec::new() };
                Ok(json!(accounts))
            }
            _ => {
                let envelope = Envelope::new(MessageKind::Request)
                    .with_method(method)
                    .with_params(params);
                self.call(envelope).await
            }
        }
    }

    /// Ask the broker for this page's view of the wallet and adopt it.
    pub async fn sync_state(&self) -> Result<StateSnapshot, RpcError> {
        let result = self.call(Envelope::new(MessageKind::GetState)).await?;
        let state: StateSnapshot = serde_json::from_value(result)
            .map_err(|e| RpcError::internal_error_with(format!("Malformed state: {}", e)))?;
        self.apply_state(&state);
        Ok(state)
    }

    /// Legacy `send(method, params)` or `send(payload)`.
    pub async fn send(&self, method_or_payload: Value, params: Option<Value>) -> Result<Value, RpcError> {
        match method_or_payload {
            Value::String(method) => {
                let params = match params {
                    Some(Value::Array(items)) => items,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other],
                };
                self.request(RequestArguments::new(&method, params)).await
            }
            payload => self.send_async(payload).await,
        }
    }

    /// Legacy `sendAsync(payload)`. Batches run in parallel; the first error
    /// fails the whole batch, otherwise results are zipped with their ids.
    pub async fn send_async(&self, payload: Value) -> Result<Value, RpcError> {
        match payload {
            Value::Array(batch) => {
                let outcomes = join_all(batch.into_iter().map(|p| self.send_one(p))).await;
                let mut responses = Vec::with_capacity(outcomes.len());
                for outcome in outcomes {
                    responses.push(outcome?);
                }
                Ok(Value::Array(responses))
            }
            single => self.send_one(single).await,
        }
    }

    async fn send_one(&self, payload: Value) -> Result<Value, RpcError> {
        let id = payload.get("id").cloned().unwrap_or(Value::Null);
        let args: RequestArguments = serde_json::from_value(payload)
            .map_err(|e| RpcError::invalid_params(format!("Invalid payload: {}", e)))?;
        let result = self.request(args).await?;
        Ok(json!({ "id": id, "jsonrpc": "2.0", "result": result }))
    }

    pub fn on(&self, event: &str, listener: L) {
        self.events.borrow_mut().on(event, listener);
    }

    pub fn remove_listener(&self, event: &str, listener: &L) {
        self.events.borrow_mut().remove_listener(event, listener);
    }

    pub fn remove_all_listeners(&self, event: Option<&str>) {
        self.events.borrow_mut().remove_all(event);
    }

    /// A message arrived on the page window.
    pub fn handle_message(&self, raw: &Value) {
        let Some(envelope) = Envelope::from_value(raw) else {
            return;
        };
        match envelope.kind {
            MessageKind::Response => {
                let Some((id, outcome)) = envelope.as_response() else {
                    return;
                };
                let waiting = self.in_flight.borrow_mut().remove(id);
                match waiting {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => trace!("No caller waiting for {}", id),
                }
            }
            MessageKind::AccountsChanged => {
                let Some(accounts) = envelope
                    .payload_value("accounts")
                    .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
                else {
                    return;
                };
                self.view.borrow_mut().replace_accounts(accounts.clone());
                self.emit(ACCOUNTS_CHANGED, &json!(accounts));
            }
            MessageKind::ChainChanged => {
                let Some(chain_id) = envelope.payload_str("chainId").map(str::to_string) else {
                    return;
                };
                self.view.borrow_mut().chain_id = Some(chain_id.clone());
                self.emit(CHAIN_CHANGED, &json!(chain_id));
            }
            MessageKind::Disconnected => {
                self.view.borrow_mut().clear();
                let reason = serde_json::to_value(RpcError::disconnected()).unwrap_or(Value::Null);
                self.emit(DISCONNECT, &reason);
            }
            MessageKind::StateUpdate => {
                let state = envelope
                    .payload_value("state")
                    .and_then(|v| serde_json::from_value::<StateSnapshot>(v.clone()).ok());
                if let Some(state) = state {
                    self.apply_state(&state);
                }
            }
            _ => {}
        }
    }

    fn apply_state(&self, state: &StateSnapshot) {
        let (accounts_changed, chain_changed) = {
            let mut view = self.view.borrow_mut();
            let accounts_changed = view.accounts != state.accounts;
            let chain_changed = view.chain_id.as_deref() != Some(state.selected_chain_id.as_str());
            view.replace_accounts(state.accounts.clone());
            view.chain_id = Some(state.selected_chain_id.clone());
            (accounts_changed, chain_changed)
        };
        if accounts_changed {
            self.emit(ACCOUNTS_CHANGED, &json!(state.accounts));
        }
        if chain_changed {
            self.emit(CHAIN_CHANGED, &json!(state.selected_chain_id));
        }
    }

    fn emit(&self, event: &str, payload: &Value) {
        let listeners = self.events.borrow().listeners(event);
        for listener in listeners {
            listener.call(payload);
        }
    }

    async fn call(&self, envelope: Envelope) -> Result<Value, RpcError> {
        let id = request_id(envelope.kind, chrono::Utc::now().timestamp_millis());
        let (tx, rx) = oneshot::channel();
        self.in_flight.borrow_mut().insert(id.clone(), tx);
        self.transport.post(&envelope.with_id(id.clone()));

        match select(rx, self.sleeper.sleep(self.timeout)).await {
            Either::Left((Ok(outcome), _)) => outcome,
            Either::Left((Err(_), _)) => Err(RpcError::disconnected()),
            Either::Right(_) => {
                self.in_flight.borrow_mut().remove(&id);
                debug!("Request {} timed out after {:?}", id, self.timeout);
                Err(RpcError::timed_out())
            }
        }
    }
}

/// `{type}_{timestamp}_{random}`, e.g. `request_1700000000000_k3j9x0a1b`.
fn request_id(kind: MessageKind, now_ms: i64) -> String {
    let mut rng = rand::thread_rng();
    let random: String = (0..9)
        .map(|_| char::from(rng.sample(Alphanumeric)).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", kind.suffix().to_lowercase(), now_ms, random)
}

#[cfg(test)]
mod tests;
