//! Pending-request table: queued approval items plus the process-local
//! responders waiting on them.

use std::collections::HashMap;

use log::debug;
use tokio::sync::oneshot;

use crate::models::{PendingRequest, RequestKind};
use crate::protocol::BrokerResponse;
use crate::scheduler::TimeoutHandle;

/// Delivers the single outcome of one pending request.
#[derive(Debug)]
pub struct PendingCallback {
    responder: oneshot::Sender<BrokerResponse>,
    timeout: TimeoutHandle,
    pub origin: String,
}

impl PendingCallback {
    pub fn new(responder: oneshot::Sender<BrokerResponse>, timeout: TimeoutHandle, origin: String) -> Self {
        Self { responder, timeout, origin }
    }

    /// Consumes the callback, so a second delivery cannot be expressed.
    pub fn resolve(self, response: BrokerResponse) {
        self.timeout.cancel();
        if self.responder.send(response).is_err() {
            debug!("Caller for {} went away before its answer", self.origin);
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingTable {
    // Insertion order is the queue order shown to the user
    requests: Vec<PendingRequest>,
    callbacks: HashMap<String, PendingCallback>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.requests.iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&PendingRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    pub fn requests(&self) -> &[PendingRequest] {
        &self.requests
    }

    /// Most recently queued request, shown first by the approval surface.
    pub fn current(&self) -> Option<&PendingRequest> {
        self.requests.last()
    }

    pub fn pending_connect_for(&self, origin: &str) -> Option<&PendingRequest> {
        self.requests
            .iter()
            .find(|r| r.kind == RequestKind::Connect && r.origin == origin)
    }

    pub fn pending_session(&self, session_id: &str) -> Option<&PendingRequest> {
        self.requests.iter().find(|r| {
            r.kind == RequestKind::WalletConnectSession && r.session_id.as_deref() == Some(session_id)
        })
    }

    /// `{prefix}_{timestamp}`, suffixed when two requests share a millisecond.
    pub fn next_id(&self, kind: RequestKind, now_ms: i64) -> String {
        let base = format!("{}_{}", kind.id_prefix(), now_ms);
        if !self.contains(&base) {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn insert(&mut self, request: PendingRequest, callback: PendingCallback) {
        self.callbacks.insert(request.id.clone(), callback);
        self.requests.push(request);
    }

    /// Remove a request and hand back its callback. Returns `None` when the
    /// id was already resolved, expired or never existed.
    pub fn take(&mut self, id: &str) -> Option<(PendingRequest, PendingCallback)> {
        let index = self.requests.iter().position(|r| r.id == id)?;
        let request = self.requests.remove(index);
        let callback = self.callbacks.remove(id)?;
        Some((request, callback))
    }
}
