//! Popup-side controller. It reaches the broker only through messages and
//! owns every interaction with the key-handling collaborators.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::broker::BrokerChannel;
use crate::collaborators::{SecretStore, Signer, WalletKeys};
use crate::error::CoreError;
use crate::models::{ConnectionRecord, PendingRequest, StateSnapshot, WalletConnectSession};
use crate::protocol::{BrokerResponse, Envelope, MessageKind, RpcError};

/// Blob handed to the [`SecretStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletSecret {
    address: String,
    private_key: String,
    #[serde(default)]
    mnemonic: Option<String>,
}

impl From<WalletKeys> for WalletSecret {
    fn from(keys: WalletKeys) -> Self {
        Self { address: keys.address, private_key: keys.private_key, mnemonic: keys.mnemonic }
    }
}

pub struct ApprovalSurface<C, Sg, Ss> {
    broker: C,
    signer: Sg,
    secrets: Ss,
}

impl<C: BrokerChannel, Sg: Signer, Ss: SecretStore> ApprovalSurface<C, Sg, Ss> {
    pub fn new(broker: C, signer: Sg, secrets: Ss) -> Self {
        Self { broker, signer, secrets }
    }

    async fn ask(&self, envelope: Envelope) -> Result<BrokerResponse, CoreError> {
        match self.broker.send(envelope).await? {
            Some(response) if !response.success => {
                Err(CoreError::Rpc(response.error.unwrap_or_else(|| RpcError::internal_error_with("Request failed"))))
            }
            Some(response) => Ok(response),
            None => Ok(BrokerResponse::done()),
        }
    }

    async fn ask_for<T: serde::de::DeserializeOwned>(&self, envelope: Envelope) -> Result<T, CoreError> {
        let result = self.ask(envelope).await?.result.unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    pub async fn has_wallet(&self) -> Result<bool, CoreError> {
        self.secrets.exists().await
    }

    /// Create a wallet, store it under `password` and unlock with it.
    pub async fn create_wallet(&self, password: &str) -> Result<WalletKeys, CoreError> {
        let keys = self.signer.create_wallet().await?;
        self.store(WalletSecret::from(keys.clone()), password).await?;
        info!("Created wallet {}", keys.address);
        Ok(keys)
    }

    pub async fn import_wallet(&self, private_key: &str, password: &str) -> Result<String, CoreError> {
        let address = self.signer.connect_with_key(private_key).await?;
        let secret = WalletSecret { address: address.clone(), private_key: private_key.to_string(), mnemonic: None };
        self.store(secret, password).await?;
        info!("Imported wallet {}", address);
        Ok(address)
    }

    async fn store(&self, secret: WalletSecret, password: &str) -> Result<(), CoreError> {
        let blob = serde_json::to_string(&secret)?;
        self.secrets.save(&blob, password).await?;
        self.set_accounts(vec![secret.address]).await
    }

    async fn open(&self, password: &str) -> Result<WalletSecret, CoreError> {
        let blob = self
            .secrets
            .load(password)
            .await?
            .ok_or_else(|| CoreError::Validation("Wrong password or no wallet stored".to_string()))?;
        Ok(serde_json::from_str(&blob)?)
    }

    pub async fn unlock(&self, password: &str) -> Result<String, CoreError> {
        let secret = self.open(password).await?;
        self.set_accounts(vec![secret.address.clone()]).await?;
        Ok(secret.address)
    }

    async fn set_accounts(&self, accounts: Vec<String>) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::SetAccounts).with("accounts", accounts)).await?;
        Ok(())
    }

    pub async fn lock(&self) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::LockWallet)).await?;
        Ok(())
    }

    pub async fn state(&self) -> Result<StateSnapshot, CoreError> {
        self.ask(Envelope::new(MessageKind::GetState))
            .await?
            .state
            .ok_or_else(|| CoreError::Transport("GET_STATE answered without state".to_string()))
    }

    pub async fn pending_requests(&self) -> Result<Vec<PendingRequest>, CoreError> {
        self.ask_for(Envelope::new(MessageKind::GetPendingRequests)).await
    }

    pub async fn connected_sites(&self) -> Result<Vec<ConnectionRecord>, CoreError> {
        self.ask_for(Envelope::new(MessageKind::GetConnectedSites)).await
    }

    pub async fn approve_connection(&self, request_id: &str, origin: &str, remember_site: bool) -> Result<(), CoreError> {
        self.ask(
            Envelope::new(MessageKind::ApproveConnection)
                .with_origin(origin)
                .with("requestId", request_id)
                .with("rememberSite", remember_site),
        )
        .await?;
        Ok(())
    }

    pub async fn reject_connection(&self, request_id: &str, origin: &str) -> Result<(), CoreError> {
        self.ask(
            Envelope::new(MessageKind::RejectConnection)
                .with_origin(origin)
                .with("requestId", request_id),
        )
        .await?;
        Ok(())
    }

    /// Sign and send a queued `eth_sendTransaction` with the stored key.
    /// A signer failure rejects the request so the page is not left waiting.
    pub async fn approve_transaction(&self, request_id: &str, password: &str) -> Result<String, CoreError> {
        let request = self
            .pending_requests()
            .await?
            .into_iter()
            .find(|r| r.id == request_id)
            .ok_or_else(|| CoreError::NotFound(format!("pending request {}", request_id)))?;
        if request.method.as_deref() != Some("eth_sendTransaction") {
            return Err(CoreError::InvalidInput(format!(
                "{} is a {:?} request; answer it with approve_with_result",
                request_id, request.method
            )));
        }

        let tx = request
            .params
            .as_ref()
            .and_then(|p| p.first())
            .cloned()
            .unwrap_or(Value::Null);
        let to = tx.get("to").and_then(Value::as_str).unwrap_or_default().to_string();
        let value = tx.get("value").and_then(Value::as_str).unwrap_or("0x0").to_string();
        if to.is_empty() {
            return Err(CoreError::InvalidInput("transaction has no recipient".to_string()));
        }

        let secret = self.open(password).await?;
        let chain_id = self.state().await?.selected_chain_id;

        match self.signer.send_token(&secret.private_key, &to, &value, &chain_id).await {
            Ok(tx_hash) => {
                info!("Sent {} for request {}", tx_hash, request_id);
                self.approve_with_result(request_id, json!(tx_hash)).await?;
                Ok(tx_hash)
            }
            Err(e) => {
                warn!("Signer failed for {}: {}", request_id, e);
                let error = RpcError::transport(&e);
                self.ask(
                    Envelope::new(MessageKind::RejectTransaction)
                        .with("requestId", request_id)
                        .with("error", serde_json::to_value(error)?),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Resolve a signing request with a result produced elsewhere.
    pub async fn approve_with_result(&self, request_id: &str, result: Value) -> Result<(), CoreError> {
        self.ask(
            Envelope::new(MessageKind::ApproveTransaction)
                .with("requestId", request_id)
                .with("result", result),
        )
        .await?;
        Ok(())
    }

    pub async fn reject_transaction(&self, request_id: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::RejectTransaction).with("requestId", request_id))
            .await?;
        Ok(())
    }

    pub async fn disconnect_site(&self, origin: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::DisconnectSite).with("origin", origin)).await?;
        Ok(())
    }

    pub async fn switch_chain(&self, chain_id: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::UpdateChain).with("chainId", chain_id)).await?;
        Ok(())
    }

    pub async fn trust_site(&self, origin: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::AddTrustedSite).with("origin", origin)).await?;
        Ok(())
    }

    pub async fn untrust_site(&self, origin: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::RemoveTrustedSite).with("origin", origin)).await?;
        Ok(())
    }

    /// Balance of `address`, or of the first account, on the selected chain.
    pub async fn balance(&self, address: Option<&str>) -> Result<String, CoreError> {
        let state = self.state().await?;
        let address = match address {
            Some(address) => address.to_string(),
            None => state
                .accounts
                .first()
                .cloned()
                .ok_or_else(|| CoreError::NotFound("no account unlocked".to_string()))?,
        };
        self.signer.get_balance(&address, &state.selected_chain_id).await
    }

    pub async fn estimate_gas(&self) -> Result<String, CoreError> {
        let state = self.state().await?;
        self.signer.estimate_gas(&state.selected_chain_id).await
    }

    pub async fn approve_wc_session(&self, request_id: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::ApproveWcSession).with("requestId", request_id))
            .await?;
        Ok(())
    }

    pub async fn reject_wc_session(&self, request_id: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::RejectWcSession).with("requestId", request_id))
            .await?;
        Ok(())
    }

    pub async fn disconnect_wc_session(&self, session_id: &str) -> Result<(), CoreError> {
        self.ask(Envelope::new(MessageKind::DisconnectWcSession).with("sessionId", session_id))
            .await?;
        Ok(())
    }

    pub async fn wc_sessions(&self) -> Result<Vec<WalletConnectSession>, CoreError> {
        self.ask_for(Envelope::new(MessageKind::GetWcSessions)).await
    }
}

#[cfg(test)]
mod tests;
