//! The request broker: the single authority deciding which origins may see
//! accounts and which requests reach the signer.
//!
//! Per (origin, request) the lifecycle is `NONE -> PENDING -> APPROVED |
//! REJECTED | TIMED_OUT`. Only the user (through the approval surface) or
//! the approval timer ends a pending request; the requesting page cannot.
//! Every mutation goes through [`Broker::handle`] or [`Broker::expire`] on
//! one owning task, and is written through to storage afterwards.

mod actor;
mod host;
mod pending;
mod persistence;
mod walletconnect;

pub use actor::{run, BrokerChannel, BrokerCommand, BrokerHandle, SenderChannel};
pub use host::{DeferredReply, ExtensionHost, Reply, SenderInfo};
pub use pending::{PendingCallback, PendingTable};

use std::time::Duration;

use log::{debug, error, info, trace, warn};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::models::{
    chain_id_to_decimal, normalize_chain_id, origin_of, GlobalWalletState, PendingRequest, RequestKind,
};
use crate::protocol::{is_signing_method, BroadcastEvent, BrokerResponse, Envelope, MessageKind, RpcError};
use crate::scheduler::{Clock, Scheduler};
use crate::settings::Settings;
use crate::storage_trait::StorageBackend;

pub struct Broker<S: StorageBackend> {
    state: GlobalWalletState,
    pending: PendingTable,
    storage: S,
    host: Box<dyn ExtensionHost>,
    scheduler: Box<dyn Scheduler>,
    clock: Box<dyn Clock>,
    approval_ttl: Duration,
}

impl<S: StorageBackend> Broker<S> {
    /// Restore persisted state and start with an empty approval queue.
    pub async fn load(
        storage: S,
        settings: &Settings,
        host: Box<dyn ExtensionHost>,
        scheduler: Box<dyn Scheduler>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let state = persistence::load_state(&storage, &settings.default_chain_id).await;
        persistence::discard_stale_requests(&storage).await;
        Self {
            state,
            pending: PendingTable::new(),
            storage,
            host,
            scheduler,
            clock,
            approval_ttl: settings.approval_ttl(),
        }
    }

    pub fn state(&self) -> &GlobalWalletState {
        &self.state
    }

    pub fn pending_requests(&self) -> &[PendingRequest] {
        self.pending.requests()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub async fn handle(&mut self, envelope: Envelope, sender: &SenderInfo) -> Reply {
        trace!("Broker received {} ({:?})", envelope.kind, envelope.id);

        if sender.is_page() && !envelope.kind.is_page_request() {
            warn!(
                "Refusing {} from page context {:?}",
                envelope.kind,
                sender.verified_origin()
            );
            return Reply::Now(BrokerResponse::err(RpcError::unauthorized()));
        }

        match envelope.kind {
            MessageKind::Connect => self.connect(&envelope, sender).await,
            MessageKind::Request => self.rpc_request(&envelope, sender).await,
            MessageKind::GetState => {
                // A page whose origin cannot be resolved is scoped to nothing
                let origin = match self.resolve_origin(&envelope, sender) {
                    Ok(origin) => Some(origin),
                    Err(_) if sender.is_page() => Some(String::new()),
                    Err(_) => None,
                };
                Reply::Now(BrokerResponse::with_state(self.state.snapshot_for(origin.as_deref())))
            }
            MessageKind::ApproveConnection => self.approve_connection(&envelope).await,
            MessageKind::RejectConnection => self.reject_connection(&envelope).await,
            MessageKind::ApproveTransaction => self.approve_transaction(&envelope).await,
            MessageKind::RejectTransaction => self.reject_transaction(&envelope).await,
            MessageKind::DisconnectSite => self.disconnect_site(&envelope).await,
            MessageKind::UpdateChain => self.update_chain(&envelope).await,
            MessageKind::GetPendingRequests => Reply::Now(to_response(self.pending.requests())),
            MessageKind::GetConnectedSites => {
                let sites: Vec<_> = self.state.connected_sites.values().collect();
                Reply::Now(to_response(&sites))
            }
            MessageKind::AddTrustedSite => self.set_trust(&envelope, true).await,
            MessageKind::RemoveTrustedSite => self.set_trust(&envelope, false).await,
            MessageKind::SetAccounts => self.set_accounts(&envelope).await,
            MessageKind::LockWallet => self.lock().await,
            MessageKind::WcSessionRequest => self.wc_session_request(&envelope).await,
            MessageKind::ApproveWcSession => self.approve_wc_session(&envelope).await,
            MessageKind::RejectWcSession => self.reject_wc_session(&envelope).await,
            MessageKind::DisconnectWcSession => self.disconnect_wc_session(&envelope).await,
            MessageKind::WcCallRequest => self.wc_call_request(&envelope).await,
            MessageKind::GetWcSessions => Reply::Now(to_response(&self.state.wallet_connect_sessions)),
            MessageKind::Response
            | MessageKind::AccountsChanged
            | MessageKind::ChainChanged
            | MessageKind::Disconnected
            | MessageKind::StateUpdate
            | MessageKind::ConnectionApproved
            | MessageKind::ConnectionRejected => {
                trace!("Ignoring broker-bound {}", envelope.kind);
                Reply::Silent
            }
        }
    }

    /// Approval window for `request_id` elapsed.
    pub async fn expire(&mut self, request_id: &str) {
        let Some((request, callback)) = self.pending.take(request_id) else {
            debug!("Timer for {} fired after the request was settled", request_id);
            return;
        };
        warn!("{:?} request {} from {} timed out", request.kind, request.id, request.origin);
        callback.resolve(BrokerResponse::err(RpcError::timed_out()));
        if request.kind == RequestKind::Connect {
            self.host.broadcast(&BroadcastEvent::ConnectionRejected {
                origin: request.origin,
                error: RpcError::timed_out(),
            });
        }
        self.queue_changed().await;
    }

    // Origin from the runtime first; the message body is only a fallback
    // for transports that cannot attest the sender.
    fn resolve_origin(&self, envelope: &Envelope, sender: &SenderInfo) -> Result<String, RpcError> {
        sender
            .verified_origin()
            .or_else(|| envelope.origin.as_deref().and_then(origin_of))
            .ok_or_else(|| RpcError::invalid_params("Unable to determine request origin"))
    }

    async fn connect(&mut self, envelope: &Envelope, sender: &SenderInfo) -> Reply {
        let origin = match self.resolve_origin(envelope, sender) {
            Ok(origin) => origin,
            Err(e) => return Reply::Now(BrokerResponse::err(e)),
        };

        // Trust alone never skips approval; only a completed connection does
        if self.state.is_connected(&origin) {
            debug!("{} already connected", origin);
            return Reply::Now(BrokerResponse::ok(json!(self.state.exposed_accounts(&origin))));
        }

        if let Some(existing) = self.pending.pending_connect_for(&origin) {
            debug!("Connect from {} already pending as {}", origin, existing.id);
            return Reply::Silent;
        }

        let request = self.new_request(RequestKind::Connect, origin, envelope, sender);
        Reply::Later(self.enqueue(request).await)
    }

    async fn rpc_request(&mut self, envelope: &Envelope, sender: &SenderInfo) -> Reply {
        let Some(method) = envelope.method.as_deref() else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing method")));
        };
        let origin = self.resolve_origin(envelope, sender);

        match method {
            "eth_requestAccounts" => self.connect(envelope, sender).await,
            "eth_accounts" => {
                let accounts = origin
                    .map(|o| self.state.exposed_accounts(&o))
                    .unwrap_or_default();
                Reply::Now(BrokerResponse::ok(json!(accounts)))
            }
            "eth_chainId" => Reply::Now(BrokerResponse::ok(json!(self.state.selected_chain_id))),
            "net_version" => Reply::Now(match chain_id_to_decimal(&self.state.selected_chain_id) {
                Some(decimal) => BrokerResponse::ok(json!(decimal)),
                None => BrokerResponse::err(RpcError::internal_error_with(format!(
                    "Invalid chain id {}",
                    self.state.selected_chain_id
                ))),
            }),
            m if is_signing_method(m) => {
                let origin = match origin {
                    Ok(origin) => origin,
                    Err(e) => return Reply::Now(BrokerResponse::err(e)),
                };
                if !self.state.is_connected(&origin) {
                    return Reply::Now(BrokerResponse::err(RpcError::unauthorized()));
                }
                let mut request = self.new_request(RequestKind::Transaction, origin, envelope, sender);
                request.method = Some(m.to_string());
                request.params = Some(envelope.params_or_empty());
                Reply::Later(self.enqueue(request).await)
            }
            other => Reply::Now(BrokerResponse::err(RpcError::method_not_found(other))),
        }
    }

    fn new_request(&self, kind: RequestKind, origin: String, envelope: &Envelope, sender: &SenderInfo) -> PendingRequest {
        let now = self.clock.now_ms();
        PendingRequest {
            id: self.pending.next_id(kind, now),
            kind,
            origin,
            method: None,
            params: None,
            tab_id: sender.tab_id,
            favicon: sender.favicon.clone().or_else(|| envelope.payload_str("favicon").map(str::to_string)),
            title: sender.title.clone().or_else(|| envelope.payload_str("title").map(str::to_string)),
            session_id: None,
            timestamp: now,
        }
    }

    /// Register a request with its callback and timer, and signal the user.
    async fn enqueue(&mut self, request: PendingRequest) -> DeferredReply {
        let (tx, rx) = oneshot::channel();
        let timeout = self.scheduler.schedule(&request.id, self.approval_ttl);
        let id = request.id.clone();

        info!("Queued {:?} request {} from {}", request.kind, request.id, request.origin);
        self.pending
            .insert(request.clone(), PendingCallback::new(tx, timeout, request.origin.clone()));
        self.host.notify_pending(&request, self.pending.len());
        self.persist_queue().await;

        DeferredReply::new(id, rx)
    }

    /// Look up the request a decision targets without removing it on a kind
    /// mismatch.
    fn take_request(&mut self, id: &str, kinds: &[RequestKind]) -> Result<(PendingRequest, PendingCallback), RpcError> {
        match self.pending.get(id) {
            None => return Err(RpcError::invalid_params(format!("Unknown or expired request {}", id))),
            Some(request) if !kinds.contains(&request.kind) => {
                return Err(RpcError::invalid_params(format!(
                    "Request {} is a {:?} request",
                    id, request.kind
                )))
            }
            Some(_) => {}
        }
        self.pending
            .take(id)
            .ok_or_else(|| RpcError::invalid_params(format!("Unknown or expired request {}", id)))
    }

    // Decisions name the request; connect decisions may name the origin instead
    fn connect_decision_id(&self, envelope: &Envelope) -> Option<String> {
        if let Some(id) = envelope.request_id() {
            return Some(id.to_string());
        }
        let origin = envelope.payload_str("origin").or(envelope.origin.as_deref())?;
        self.pending.pending_connect_for(origin).map(|r| r.id.clone())
    }

    async fn approve_connection(&mut self, envelope: &Envelope) -> Reply {
        let Some(id) = self.connect_decision_id(envelope) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing requestId")));
        };
        let (request, callback) = match self.take_request(&id, &[RequestKind::Connect]) {
            Ok(taken) => taken,
            Err(e) => return Reply::Now(BrokerResponse::err(e)),
        };

        let remember = envelope.payload_bool("rememberSite").unwrap_or(false);
        self.state.record_connection(&request.origin, self.clock.now_ms(), remember);
        let accounts = self.state.exposed_accounts(&request.origin);
        info!("Approved connection {} for {} (remember: {})", id, request.origin, remember);

        callback.resolve(BrokerResponse::ok(json!(accounts)));
        self.host.broadcast(&BroadcastEvent::ConnectionApproved { origin: request.origin, accounts });
        self.persist_state().await;
        self.queue_changed().await;
        Reply::Silent
    }

    async fn reject_connection(&mut self, envelope: &Envelope) -> Reply {
        let Some(id) = self.connect_decision_id(envelope) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing requestId")));
        };
        let (request, callback) = match self.take_request(&id, &[RequestKind::Connect]) {
            Ok(taken) => taken,
            Err(e) => return Reply::Now(BrokerResponse::err(e)),
        };

        info!("Rejected connection {} for {}", id, request.origin);
        callback.resolve(BrokerResponse::err(RpcError::user_rejected()));
        self.host.broadcast(&BroadcastEvent::ConnectionRejected {
            origin: request.origin,
            error: RpcError::user_rejected(),
        });
        self.queue_changed().await;
        Reply::Silent
    }

    async fn approve_transaction(&mut self, envelope: &Envelope) -> Reply {
        let Some(id) = envelope.request_id().map(str::to_string) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing requestId")));
        };
        let (request, callback) =
            match self.take_request(&id, &[RequestKind::Transaction, RequestKind::WalletConnectCall]) {
                Ok(taken) => taken,
                Err(e) => return Reply::Now(BrokerResponse::err(e)),
            };

        info!("Approved {:?} {} for {}", request.method, id, request.origin);
        let result = envelope.payload_value("result").cloned().unwrap_or(Value::Null);
        callback.resolve(BrokerResponse::ok(result));
        self.queue_changed().await;
        Reply::Silent
    }

    async fn reject_transaction(&mut self, envelope: &Envelope) -> Reply {
        let Some(id) = envelope.request_id().map(str::to_string) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing requestId")));
        };
        let (request, callback) =
            match self.take_request(&id, &[RequestKind::Transaction, RequestKind::WalletConnectCall]) {
                Ok(taken) => taken,
                Err(e) => return Reply::Now(BrokerResponse::err(e)),
            };

        let error = envelope
            .payload_value("error")
            .and_then(|e| serde_json::from_value::<RpcError>(e.clone()).ok())
            .unwrap_or_else(RpcError::user_rejected);
        info!("Rejected {:?} {} for {}: {}", request.method, id, request.origin, error);
        callback.resolve(BrokerResponse::err(error));
        self.queue_changed().await;
        Reply::Silent
    }

    async fn disconnect_site(&mut self, envelope: &Envelope) -> Reply {
        let Some(origin) = target_origin(envelope) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing origin")));
        };
        if self.state.connected_sites.remove(&origin).is_some() {
            info!("Disconnected {}", origin);
            self.persist_state().await;
        } else {
            debug!("Disconnect for {} which had no connection record", origin);
        }
        self.host.broadcast(&BroadcastEvent::Disconnected { origin: Some(origin) });
        Reply::Now(BrokerResponse::done())
    }

    async fn update_chain(&mut self, envelope: &Envelope) -> Reply {
        let Some(chain_id) = envelope.payload_value("chainId").and_then(normalize_chain_id) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Invalid chainId")));
        };
        if chain_id != self.state.selected_chain_id {
            info!("Switching chain {} -> {}", self.state.selected_chain_id, chain_id);
            self.state.selected_chain_id = chain_id.clone();
            self.persist_state().await;
            self.host.broadcast(&BroadcastEvent::ChainChanged { chain_id });
        }
        Reply::Now(BrokerResponse::done())
    }

    async fn set_trust(&mut self, envelope: &Envelope, trusted: bool) -> Reply {
        let Some(origin) = target_origin(envelope) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing origin")));
        };
        if trusted {
            self.state.trust(&origin);
        } else {
            self.state.untrust(&origin);
        }
        debug!("{} trust for {}", if trusted { "Added" } else { "Removed" }, origin);
        self.persist_state().await;
        Reply::Now(BrokerResponse::done())
    }

    async fn set_accounts(&mut self, envelope: &Envelope) -> Reply {
        let accounts = envelope
            .payload_value("accounts")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok());
        let Some(accounts) = accounts else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("accounts must be a list of addresses")));
        };

        info!("Wallet unlocked with {} account(s)", accounts.len());
        self.state.accounts = accounts.clone();
        self.state.is_unlocked = true;
        self.persist_state().await;
        self.host.broadcast(&BroadcastEvent::AccountsChanged { accounts });
        Reply::Now(BrokerResponse::done())
    }

    // Locking only flips the flag; connected origins keep seeing addresses
    async fn lock(&mut self) -> Reply {
        info!("Wallet locked");
        self.state.is_unlocked = false;
        self.persist_state().await;
        self.host.broadcast(&BroadcastEvent::StateUpdate { state: self.state.snapshot_for(None) });
        Reply::Now(BrokerResponse::done())
    }

    async fn queue_changed(&mut self) {
        self.host.queue_changed(self.pending.len());
        self.persist_queue().await;
    }

    async fn persist_state(&self) {
        if let Err(e) = persistence::save_state(&self.storage, &self.state).await {
            error!("Failed to persist wallet state: {}", e);
        }
    }

    async fn persist_queue(&self) {
        if let Err(e) = persistence::save_queue(&self.storage, &self.pending).await {
            error!("Failed to persist approval queue: {}", e);
        }
    }
}

fn target_origin(envelope: &Envelope) -> Option<String> {
    let raw = envelope.payload_str("origin").or(envelope.origin.as_deref())?;
    if raw.is_empty() {
        return None;
    }
    Some(origin_of(raw).unwrap_or_else(|| raw.to_string()))
}

fn to_response<T: serde::Serialize + ?Sized>(value: &T) -> BrokerResponse {
    match serde_json::to_value(value) {
        Ok(v) => BrokerResponse::ok(v),
        Err(e) => BrokerResponse::err(RpcError::internal_error_with(format!("Internal error: {}", e))),
    }
}
