//! Wire protocol shared by the page, content-script and background contexts.
//!
//! Every message is an [`Envelope`]: `{type, id?, origin?, method?, params?, ...payload}`.
//! Message types exist under two historical prefixes; both are accepted and
//! normalized to a single [`MessageKind`] at the boundary, and outgoing
//! messages always carry the canonical prefix.

mod events;
mod rpc_error;

pub use events::{BroadcastEvent, BrokerResponse};
pub use rpc_error::{ErrorCode, RpcError};

use log::trace;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

pub const CANONICAL_PREFIX: &str = "EMBER_";
pub const LEGACY_PREFIX: &str = "WALLET_";

/// JSON-RPC methods that disclose or use the user's keys.
pub const SIGNING_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_signTransaction",
    "personal_sign",
    "eth_sign",
    "eth_signTypedData_v4",
];

pub fn is_signing_method(method: &str) -> bool {
    SIGNING_METHODS.contains(&method)
}

/// Canonical enumeration of every cross-context message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // page -> broker
    Connect,
    Request,
    GetState,
    // broker/relay -> page
    Response,
    AccountsChanged,
    ChainChanged,
    Disconnected,
    StateUpdate,
    // broker -> tabs
    ConnectionApproved,
    ConnectionRejected,
    // approval surface -> broker
    ApproveConnection,
    RejectConnection,
    ApproveTransaction,
    RejectTransaction,
    DisconnectSite,
    UpdateChain,
    GetPendingRequests,
    GetConnectedSites,
    AddTrustedSite,
    RemoveTrustedSite,
    SetAccounts,
    LockWallet,
    // WalletConnect-style sessions
    WcSessionRequest,
    ApproveWcSession,
    RejectWcSession,
    DisconnectWcSession,
    WcCallRequest,
    GetWcSessions,
}

impl MessageKind {
    pub const ALL: &'static [MessageKind] = &[
        MessageKind::Connect,
        MessageKind::Request,
        MessageKind::GetState,
        MessageKind::Response,
        MessageKind::AccountsChanged,
        MessageKind::ChainChanged,
        MessageKind::Disconnected,
        MessageKind::StateUpdate,
        MessageKind::ConnectionApproved,
        MessageKind::ConnectionRejected,
        MessageKind::ApproveConnection,
        MessageKind::RejectConnection,
        MessageKind::ApproveTransaction,
        MessageKind::RejectTransaction,
        MessageKind::DisconnectSite,
        MessageKind::UpdateChain,
        MessageKind::GetPendingRequests,
        MessageKind::GetConnectedSites,
        MessageKind::AddTrustedSite,
        MessageKind::RemoveTrustedSite,
        MessageKind::SetAccounts,
        MessageKind::LockWallet,
        MessageKind::WcSessionRequest,
        MessageKind::ApproveWcSession,
        MessageKind::RejectWcSession,
        MessageKind::DisconnectWcSession,
        MessageKind::WcCallRequest,
        MessageKind::GetWcSessions,
    ];

    /// Type name without any namespace prefix.
    pub const fn suffix(&self) -> &'static str {
        match self {
            MessageKind::Connect => "CONNECT",
            MessageKind::Request => "REQUEST",
            MessageKind::GetState => "GET_STATE",
            MessageKind::Response => "RESPONSE",
            MessageKind::AccountsChanged => "ACCOUNTS_CHANGED",
            MessageKind::ChainChanged => "CHAIN_CHANGED",
            MessageKind::Disconnected => "DISCONNECTED",
            MessageKind::StateUpdate => "STATE_UPDATE",
            MessageKind::ConnectionApproved => "CONNECTION_APPROVED",
            MessageKind::ConnectionRejected => "CONNECTION_REJECTED",
            MessageKind::ApproveConnection => "APPROVE_CONNECTION",
            MessageKind::RejectConnection => "REJECT_CONNECTION",
            MessageKind::ApproveTransaction => "APPROVE_TRANSACTION",
            MessageKind::RejectTransaction => "REJECT_TRANSACTION",
            MessageKind::DisconnectSite => "DISCONNECT_SITE",
            MessageKind::UpdateChain => "UPDATE_CHAIN",
            MessageKind::GetPendingRequests => "GET_PENDING_REQUESTS",
            MessageKind::GetConnectedSites => "GET_CONNECTED_SITES",
            MessageKind::AddTrustedSite => "ADD_TRUSTED_SITE",
            MessageKind::RemoveTrustedSite => "REMOVE_TRUSTED_SITE",
            MessageKind::SetAccounts => "SET_ACCOUNTS",
            MessageKind::LockWallet => "LOCK_WALLET",
            MessageKind::WcSessionRequest => "WC_SESSION_REQUEST",
            MessageKind::ApproveWcSession => "APPROVE_WC_SESSION",
            MessageKind::RejectWcSession => "REJECT_WC_SESSION",
            MessageKind::DisconnectWcSession => "DISCONNECT_WC_SESSION",
            MessageKind::WcCallRequest => "WC_CALL_REQUEST",
            MessageKind::GetWcSessions => "GET_WC_SESSIONS",
        }
    }

    /// Full type name under the canonical prefix.
    pub fn type_name(&self) -> String {
        format!("{}{}", CANONICAL_PREFIX, self.suffix())
    }

    /// Normalize a raw type string. Both prefixes are synonyms.
    pub fn parse(raw: &str) -> Option<Self> {
        let suffix = raw
            .strip_prefix(CANONICAL_PREFIX)
            .or_else(|| raw.strip_prefix(LEGACY_PREFIX))?;
        Self::ALL.iter().copied().find(|kind| kind.suffix() == suffix)
    }

    /// Messages a page is allowed to originate. Everything else arriving
    /// from page context is dropped by the relay.
    pub fn is_page_request(&self) -> bool {
        matches!(self, MessageKind::Connect | MessageKind::Request | MessageKind::GetState)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CANONICAL_PREFIX, self.suffix())
    }
}

impl Serialize for MessageKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.type_name())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        MessageKind::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized message type: {}", raw)))
    }
}

/// Message envelope exchanged between contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: MessageKind) -> Self {
        Self { kind, id: None, origin: None, method: None, params: None, payload: Map::new() }
    }

    /// Parse an untrusted value. Anything that is not an object carrying a
    /// recognized type is ignored (`None`), never an error.
    pub fn from_value(value: &Value) -> Option<Self> {
        let raw_type = value.get("type")?.as_str()?;
        if MessageKind::parse(raw_type).is_none() {
            trace!("Ignoring message with unrecognized type {}", raw_type);
            return None;
        }
        match serde_json::from_value(value.clone()) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                trace!("Ignoring malformed {} message: {}", raw_type, e);
                None
            }
        }
    }

    pub fn to_value(&self) -> Value {
        // Envelope only holds JSON values and string keys.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn payload_value(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    /// `requestId` of an approval-surface decision.
    pub fn request_id(&self) -> Option<&str> {
        self.payload_str("requestId")
    }

    pub fn params_or_empty(&self) -> Vec<Value> {
        self.params.clone().unwrap_or_default()
    }

    /// Answer to a page request, addressed by the page's own request id.
    pub fn response(id: &str, outcome: &Result<Value, RpcError>) -> Self {
        let envelope = Envelope::new(MessageKind::Response).with_id(id);
        match outcome {
            Ok(result) => envelope.with("success", true).with("result", result.clone()),
            Err(error) => envelope
                .with("success", false)
                .with("error", serde_json::to_value(error).unwrap_or(Value::Null)),
        }
    }

    /// Inverse of [`Envelope::response`].
    pub fn as_response(&self) -> Option<(&str, Result<Value, RpcError>)> {
        if self.kind != MessageKind::Response {
            return None;
        }
        let id = self.id.as_deref()?;
        if self.payload_bool("success").unwrap_or(false) {
            return Some((id, Ok(self.payload_value("result").cloned().unwrap_or(Value::Null))));
        }
        let error = self
            .payload_value("error")
            .and_then(|e| serde_json::from_value::<RpcError>(e.clone()).ok())
            .unwrap_or_else(|| RpcError::internal_error_with("Malformed error response"));
        Some((id, Err(error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn both_prefixes_name_the_same_kind() {
        assert_eq!(MessageKind::parse("EMBER_CONNECT"), Some(MessageKind::Connect));
        assert_eq!(MessageKind::parse("WALLET_CONNECT"), Some(MessageKind::Connect));
        assert_eq!(
            MessageKind::parse("WALLET_APPROVE_CONNECTION"),
            Some(MessageKind::ApproveConnection)
        );
        assert_eq!(MessageKind::parse("CONNECT"), None);
        assert_eq!(MessageKind::parse("OTHER_CONNECT"), None);
    }

    #[test]
    fn every_kind_round_trips_through_its_type_name() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::parse(&kind.type_name()), Some(*kind));
        }
    }

    #[test]
    fn legacy_envelope_is_reemitted_with_canonical_prefix() {
        let raw = json!({
            "type": "WALLET_REQUEST",
            "id": "request_1_abc",
            "method": "eth_chainId",
            "params": [],
            "extra": 7
        });
        let envelope = Envelope::from_value(&raw).unwrap();
        assert_eq!(envelope.kind, MessageKind::Request);
        assert_eq!(envelope.payload_value("extra"), Some(&json!(7)));

        let out = envelope.to_value();
        assert_eq!(out["type"], "EMBER_REQUEST");
        assert_eq!(out["extra"], 7);
    }

    #[test]
    fn unrecognized_or_malformed_messages_are_ignored() {
        assert!(Envelope::from_value(&json!({"type": "SOMETHING_ELSE"})).is_none());
        assert!(Envelope::from_value(&json!({"hello": "world"})).is_none());
        assert!(Envelope::from_value(&json!("EMBER_CONNECT")).is_none());
        assert!(Envelope::from_value(&json!({"type": "EMBER_REQUEST", "params": "nope"})).is_none());
    }

    #[test]
    fn response_envelope_carries_success_and_error() {
        let ok = Envelope::response("r1", &Ok(json!(["0xabc"])));
        assert_eq!(ok.as_response(), Some(("r1", Ok(json!(["0xabc"])))));

        let err = Envelope::response("r2", &Err(RpcError::unauthorized()));
        let (id, outcome) = err.as_response().unwrap();
        assert_eq!(id, "r2");
        assert_eq!(outcome.unwrap_err().code, ErrorCode::Unauthorized);
    }
}
