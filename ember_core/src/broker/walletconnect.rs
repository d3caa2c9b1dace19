// WalletConnect-style sessions. Same pending/callback lifecycle as site
// connections, keyed by session id; no trust or remember concept.

use log::info;
use serde_json::{json, Value};

use super::{Broker, Reply};
use crate::models::{normalize_chain_id, origin_of, PendingRequest, RequestKind, WalletConnectSession};
use crate::protocol::{is_signing_method, BrokerResponse, Envelope, RpcError};
use crate::storage_trait::StorageBackend;

fn session_origin(session_id: &str, peer_url: Option<&str>) -> String {
    peer_url
        .and_then(origin_of)
        .unwrap_or_else(|| format!("wc:{}", session_id))
}

impl<S: StorageBackend> Broker<S> {
    pub(super) async fn wc_session_request(&mut self, envelope: &Envelope) -> Reply {
        let session_id = envelope
            .payload_str("sessionId")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()));
        if self.state.session(&session_id).is_some() {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params(format!(
                "Session {} is already active",
                session_id
            ))));
        }
        if let Some(existing) = self.pending.pending_session(&session_id) {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params(format!(
                "Session {} is already awaiting approval as {}",
                session_id, existing.id
            ))));
        }

        let peer_name = envelope.payload_str("peerName").map(str::to_string);
        let peer_url = envelope.payload_str("peerUrl").map(str::to_string);
        let now = self.clock.now_ms();
        let request = PendingRequest {
            id: self.pending.next_id(RequestKind::WalletConnectSession, now),
            kind: RequestKind::WalletConnectSession,
            origin: session_origin(&session_id, peer_url.as_deref()),
            method: None,
            params: Some(vec![json!({ "peerName": peer_name, "peerUrl": peer_url })]),
            tab_id: None,
            favicon: envelope.payload_str("peerIcon").map(str::to_string),
            title: peer_name,
            session_id: Some(session_id),
            timestamp: now,
        };
        Reply::Later(self.enqueue(request).await)
    }

    pub(super) async fn approve_wc_session(&mut self, envelope: &Envelope) -> Reply {
        let Some(id) = envelope.request_id().map(str::to_string) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing requestId")));
        };
        let (request, callback) = match self.take_request(&id, &[RequestKind::WalletConnectSession]) {
            Ok(taken) => taken,
            Err(e) => return Reply::Now(BrokerResponse::err(e)),
        };

        let peer = request
            .params
            .as_ref()
            .and_then(|p| p.first())
            .cloned()
            .unwrap_or(Value::Null);
        let accounts = envelope
            .payload_value("accounts")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .unwrap_or_else(|| self.state.accounts.clone());
        let chain_id = envelope
            .payload_value("chainId")
            .and_then(normalize_chain_id)
            .unwrap_or_else(|| self.state.selected_chain_id.clone());

        let session = WalletConnectSession {
            session_id: request.session_id.clone().unwrap_or_else(|| request.id.clone()),
            peer_name: peer.get("peerName").and_then(Value::as_str).map(str::to_string),
            peer_url: peer.get("peerUrl").and_then(Value::as_str).map(str::to_string),
            chain_id,
            accounts,
            created_at: self.clock.now_ms(),
        };
        info!("Approved WalletConnect session {} ({:?})", session.session_id, session.peer_name);

        callback.resolve(BrokerResponse::ok(json!(session)));
        self.state.wallet_connect_sessions.retain(|s| s.session_id != session.session_id);
        self.state.wallet_connect_sessions.push(session);
        self.persist_state().await;
        self.queue_changed().await;
        Reply::Silent
    }

    pub(super) async fn reject_wc_session(&mut self, envelope: &Envelope) -> Reply {
        let Some(id) = envelope.request_id().map(str::to_string) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing requestId")));
        };
        let (request, callback) = match self.take_request(&id, &[RequestKind::WalletConnectSession]) {
            Ok(taken) => taken,
            Err(e) => return Reply::Now(BrokerResponse::err(e)),
        };

        info!("Rejected WalletConnect session request {} from {}", id, request.origin);
        callback.resolve(BrokerResponse::err(RpcError::user_rejected()));
        self.queue_changed().await;
        Reply::Silent
    }

    pub(super) async fn disconnect_wc_session(&mut self, envelope: &Envelope) -> Reply {
        let Some(session_id) = envelope.payload_str("sessionId").map(str::to_string) else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing sessionId")));
        };
        let before = self.state.wallet_connect_sessions.len();
        self.state.wallet_connect_sessions.retain(|s| s.session_id != session_id);
        if self.state.wallet_connect_sessions.len() == before {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params(format!(
                "Unknown session {}",
                session_id
            ))));
        }

        info!("Disconnected WalletConnect session {}", session_id);
        self.persist_state().await;
        Reply::Now(BrokerResponse::done())
    }

    pub(super) async fn wc_call_request(&mut self, envelope: &Envelope) -> Reply {
        let Some(session_id) = envelope.payload_str("sessionId") else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing sessionId")));
        };
        let Some(session) = self.state.session(session_id).cloned() else {
            return Reply::Now(BrokerResponse::err(RpcError::unauthorized()));
        };
        let Some(method) = envelope.method.as_deref() else {
            return Reply::Now(BrokerResponse::err(RpcError::invalid_params("Missing method")));
        };

        match method {
            "eth_accounts" | "eth_requestAccounts" => Reply::Now(BrokerResponse::ok(json!(session.accounts))),
            "eth_chainId" => Reply::Now(BrokerResponse::ok(json!(session.chain_id))),
            m if is_signing_method(m) => {
                let now = self.clock.now_ms();
                let request = PendingRequest {
                    id: self.pending.next_id(RequestKind::WalletConnectCall, now),
                    kind: RequestKind::WalletConnectCall,
                    origin: session_origin(&session.session_id, session.peer_url.as_deref()),
                    method: Some(m.to_string()),
                    params: Some(envelope.params_or_empty()),
                    tab_id: None,
                    favicon: None,
                    title: session.peer_name.clone(),
                    session_id: Some(session.session_id.clone()),
                    timestamp: now,
                };
                Reply::Later(self.enqueue(request).await)
            }
            other => Reply::Now(BrokerResponse::err(RpcError::method_not_found(other))),
        }
    }
}
