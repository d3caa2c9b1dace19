use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Website security principal: `scheme://host[:port]`.
pub type Origin = String;

pub const DEFAULT_CHAIN_ID: &str = "0x1";

/// Derive the origin of a URL. Opaque origins (`data:`, `file:` ...) have no
/// usable identity and yield `None`.
pub fn origin_of(raw_url: &str) -> Option<Origin> {
    let parsed = url::Url::parse(raw_url).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// `0x89` -> `137`. Used for `net_version`.
pub fn chain_id_to_decimal(chain_id: &str) -> Option<String> {
    let trimmed = chain_id.trim();
    let value = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => trimmed.parse::<u64>().ok()?,
    };
    Some(value.to_string())
}

/// Accept `137`, `"137"` or `"0x89"` and return the canonical hex form.
pub fn normalize_chain_id(raw: &Value) -> Option<String> {
    let value = match raw {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok()?,
                None => s.parse::<u64>().ok()?,
            }
        }
        _ => return None,
    };
    Some(format!("{:#x}", value))
}

/// Per-origin approval record. Created on approval, removed only by an
/// explicit disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub origin: Origin,
    pub connected_at: i64,
    pub connected: bool,
    pub trusted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Connect,
    Transaction,
    WalletConnectSession,
    WalletConnectCall,
}

impl RequestKind {
    /// Prefix of generated request ids (`conn_<timestamp>`).
    pub const fn id_prefix(&self) -> &'static str {
        match self {
            RequestKind::Connect => "conn",
            RequestKind::Transaction => "tx",
            RequestKind::WalletConnectSession => "wc",
            RequestKind::WalletConnectCall => "wccall",
        }
    }
}

/// Queued item awaiting a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: i64,
}

/// An approved WalletConnect-style session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConnectSession {
    pub session_id: String,
    #[serde(default)]
    pub peer_name: Option<String>,
    #[serde(default)]
    pub peer_url: Option<String>,
    pub chain_id: String,
    pub accounts: Vec<String>,
    pub created_at: i64,
}

/// Process-wide wallet state owned by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalWalletState {
    #[serde(default)]
    pub is_unlocked: bool,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default = "default_chain_id")]
    pub selected_chain_id: String,
    #[serde(default)]
    pub connected_sites: BTreeMap<Origin, ConnectionRecord>,
    #[serde(default)]
    pub trusted_sites: BTreeSet<Origin>,
    #[serde(default)]
    pub wallet_connect_sessions: Vec<WalletConnectSession>,
}

fn default_chain_id() -> String {
    DEFAULT_CHAIN_ID.to_string()
}

impl Default for GlobalWalletState {
    fn default() -> Self {
        Self::with_chain(DEFAULT_CHAIN_ID)
    }
}

impl GlobalWalletState {
    pub fn with_chain(chain_id: &str) -> Self {
        Self {
            is_unlocked: false,
            accounts: Vec::new(),
            selected_chain_id: chain_id.to_string(),
            connected_sites: BTreeMap::new(),
            trusted_sites: BTreeSet::new(),
            wallet_connect_sessions: Vec::new(),
        }
    }

    pub fn is_connected(&self, origin: &str) -> bool {
        self.connected_sites.get(origin).map(|r| r.connected).unwrap_or(false)
    }

    /// Accounts an origin is allowed to see.
    pub fn exposed_accounts(&self, origin: &str) -> Vec<String> {
        if self.is_connected(origin) {
            self.accounts.clone()
        } else {
            Vec::new()
        }
    }

    pub fn record_connection(&mut self, origin: &str, now_ms: i64, remember: bool) {
        self.connected_sites.insert(
            origin.to_string(),
            ConnectionRecord { origin: origin.to_string(), connected_at: now_ms, connected: true, trusted: remember },
        );
        if remember {
            self.trusted_sites.insert(origin.to_string());
        }
    }

    pub fn trust(&mut self, origin: &str) {
        self.trusted_sites.insert(origin.to_string());
        if let Some(record) = self.connected_sites.get_mut(origin) {
            record.trusted = true;
        }
    }

    /// Removing trust also clears the flag on the record so `trusted`
    /// never outlives set membership.
    pub fn untrust(&mut self, origin: &str) {
        self.trusted_sites.remove(origin);
        if let Some(record) = self.connected_sites.get_mut(origin) {
            record.trusted = false;
        }
    }

    pub fn session(&self, session_id: &str) -> Option<&WalletConnectSession> {
        self.wallet_connect_sessions.iter().find(|s| s.session_id == session_id)
    }

    /// State as revealed to a caller. Pages (`Some(origin)`) only see their
    /// own record and only see accounts once connected; the privileged
    /// extension surfaces (`None`) see everything.
    pub fn snapshot_for(&self, origin: Option<&str>) -> StateSnapshot {
        let full = StateSnapshot {
            is_unlocked: self.is_unlocked,
            selected_chain_id: self.selected_chain_id.clone(),
            accounts: self.accounts.clone(),
            connected_sites: self.connected_sites.clone(),
        };
        match origin {
            None => full,
            Some(origin) => full.scoped_to(origin),
        }
    }
}

/// Payload of `GET_STATE` and `STATE_UPDATE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub is_unlocked: bool,
    pub selected_chain_id: String,
    pub accounts: Vec<String>,
    pub connected_sites: BTreeMap<Origin, ConnectionRecord>,
}

impl StateSnapshot {
    /// Narrow a full snapshot to what `origin` may see.
    pub fn scoped_to(&self, origin: &str) -> StateSnapshot {
        let record = self.connected_sites.get(origin);
        let connected = record.map(|r| r.connected).unwrap_or(false);
        StateSnapshot {
            is_unlocked: self.is_unlocked,
            selected_chain_id: self.selected_chain_id.clone(),
            accounts: if connected { self.accounts.clone() } else { Vec::new() },
            connected_sites: record
                .map(|r| BTreeMap::from([(origin.to_string(), r.clone())]))
                .unwrap_or_default(),
        }
    }

    pub fn is_connected(&self, origin: &str) -> bool {
        self.connected_sites.get(origin).map(|r| r.connected).unwrap_or(false)
    }
}

/// Advisory per-shim cache of the last broadcast seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsView {
    pub connected: bool,
    pub accounts: Vec<String>,
    pub chain_id: Option<String>,
}

impl AccountsView {
    pub fn primary_address(&self) -> Option<&str> {
        self.accounts.first().map(String::as_str)
    }

    pub fn replace_accounts(&mut self, accounts: Vec<String>) {
        self.connected = !accounts.is_empty();
        self.accounts = accounts;
    }

    pub fn clear(&mut self) {
        self.connected = false;
        self.accounts.clear();
    }
}
