// Interfaces of the key-management collaborators the approval surface uses.
// Signing, chain RPC and secret encryption live behind these traits.

use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Freshly created or imported key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletKeys {
    pub address: String,
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
}

#[async_trait(?Send)]
pub trait Signer {
    async fn create_wallet(&self) -> Result<WalletKeys, CoreError>;

    /// Derive the address of an existing private key.
    async fn connect_with_key(&self, private_key: &str) -> Result<String, CoreError>;

    /// Sign and broadcast a transfer; returns the transaction hash.
    async fn send_token(&self, private_key: &str, to: &str, amount: &str, chain_id: &str) -> Result<String, CoreError>;

    async fn get_balance(&self, address: &str, chain_id: &str) -> Result<String, CoreError>;

    async fn estimate_gas(&self, chain_id: &str) -> Result<String, CoreError>;
}

/// Password-protected blob store holding the serialized [`WalletKeys`].
#[async_trait(?Send)]
pub trait SecretStore {
    async fn save(&self, blob: &str, password: &str) -> Result<(), CoreError>;

    /// `None` when nothing is stored or the password does not open it.
    async fn load(&self, password: &str) -> Result<Option<String>, CoreError>;

    async fn exists(&self) -> Result<bool, CoreError>;
}
