use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Envelope, MessageKind, RpcError};
use crate::models::StateSnapshot;

/// Structured broker answer. The broker never lets a failure cross the
/// message boundary as anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSnapshot>,
}

impl BrokerResponse {
    pub fn ok(result: Value) -> Self {
        Self { success: true, result: Some(result), error: None, state: None }
    }

    pub fn done() -> Self {
        Self { success: true, result: None, error: None, state: None }
    }

    pub fn err(error: RpcError) -> Self {
        Self { success: false, result: None, error: Some(error), state: None }
    }

    pub fn with_state(state: StateSnapshot) -> Self {
        Self { success: true, result: None, error: None, state: Some(state) }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| RpcError::internal_error_with("Request failed without an error")))
        }
    }
}

impl From<Result<Value, RpcError>> for BrokerResponse {
    fn from(outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(v) => BrokerResponse::ok(v),
            Err(e) => BrokerResponse::err(e),
        }
    }
}

/// Fire-and-forget notifications the broker fans out to every tab.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    ConnectionApproved { origin: String, accounts: Vec<String> },
    ConnectionRejected { origin: String, error: RpcError },
    /// `origin: None` addresses every tab (wallet-wide disconnect).
    Disconnected { origin: Option<String> },
    ChainChanged { chain_id: String },
    AccountsChanged { accounts: Vec<String> },
    StateUpdate { state: StateSnapshot },
}

impl BroadcastEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            BroadcastEvent::ConnectionApproved { .. } => MessageKind::ConnectionApproved,
            BroadcastEvent::ConnectionRejected { .. } => MessageKind::ConnectionRejected,
            BroadcastEvent::Disconnected { .. } => MessageKind::Disconnected,
            BroadcastEvent::ChainChanged { .. } => MessageKind::ChainChanged,
            BroadcastEvent::AccountsChanged { .. } => MessageKind::AccountsChanged,
            BroadcastEvent::StateUpdate { .. } => MessageKind::StateUpdate,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let envelope = Envelope::new(self.kind());
        match self {
            BroadcastEvent::ConnectionApproved { origin, accounts } => {
                envelope.with_origin(origin.clone()).with("accounts", accounts.clone())
            }
            BroadcastEvent::ConnectionRejected { origin, error } => envelope
                .with_origin(origin.clone())
                .with("error", serde_json::to_value(error).unwrap_or(Value::Null)),
            BroadcastEvent::Disconnected { origin } => match origin {
                Some(origin) => envelope.with_origin(origin.clone()),
                None => envelope,
            },
            BroadcastEvent::ChainChanged { chain_id } => envelope.with("chainId", chain_id.clone()),
            BroadcastEvent::AccountsChanged { accounts } => envelope.with("accounts", accounts.clone()),
            BroadcastEvent::StateUpdate { state } => {
                envelope.with("state", serde_json::to_value(state).unwrap_or(Value::Null))
            }
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let accounts = || -> Option<Vec<String>> {
            serde_json::from_value(envelope.payload_value("accounts")?.clone()).ok()
        };
        match envelope.kind {
            MessageKind::ConnectionApproved => Some(BroadcastEvent::ConnectionApproved {
                origin: envelope.origin.clone()?,
                accounts: accounts()?,
            }),
            MessageKind::ConnectionRejected => Some(BroadcastEvent::ConnectionRejected {
                origin: envelope.origin.clone()?,
                error: envelope
                    .payload_value("error")
                    .and_then(|e| serde_json::from_value(e.clone()).ok())
                    .unwrap_or_else(RpcError::user_rejected),
            }),
            MessageKind::Disconnected => Some(BroadcastEvent::Disconnected { origin: envelope.origin.clone() }),
            MessageKind::ChainChanged => Some(BroadcastEvent::ChainChanged {
                chain_id: envelope.payload_str("chainId")?.to_string(),
            }),
            MessageKind::AccountsChanged => Some(BroadcastEvent::AccountsChanged { accounts: accounts()? }),
            MessageKind::StateUpdate => Some(BroadcastEvent::StateUpdate {
                state: serde_json::from_value(envelope.payload_value("state")?.clone()).ok()?,
            }),
            _ => None,
        }
    }

    /// Whether a tab showing `origin` should act on this event.
    pub fn concerns(&self, origin: &str) -> bool {
        match self {
            BroadcastEvent::ConnectionApproved { origin: o, .. }
            | BroadcastEvent::ConnectionRejected { origin: o, .. } => o == origin,
            BroadcastEvent::Disconnected { origin: o } => o.as_deref().map(|o| o == origin).unwrap_or(true),
            _ => true,
        }
    }
}
