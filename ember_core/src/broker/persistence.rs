// Write-through persistence of the broker's state.
//
// Layout: the wallet-wide fields under `state`, and the pieces other
// contexts read directly under their own keys. Trusted sites and sessions
// live only under their own keys. On load the separate keys win, so a value
// written by a newer build under its own key is never lost to an older
// `state` blob.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use serde::Serialize;

use crate::models::{ConnectionRecord, GlobalWalletState, Origin, PendingRequest, WalletConnectSession};
use crate::storage_trait::{keys, StorageBackend, StorageResult};

use super::pending::PendingTable;

pub async fn load_state<S: StorageBackend>(storage: &S, default_chain_id: &str) -> GlobalWalletState {
    let mut state = match storage.load::<GlobalWalletState>(keys::STATE).await {
        Ok(Some(saved)) => saved,
        Ok(None) => GlobalWalletState::with_chain(default_chain_id),
        Err(e) => {
            warn!("Stored wallet state unreadable, starting fresh: {}", e);
            GlobalWalletState::with_chain(default_chain_id)
        }
    };

    if let Some(accounts) = load_or_warn::<S, Vec<String>>(storage, keys::ACCOUNTS).await {
        state.accounts = accounts;
    }
    if let Some(sites) = load_or_warn::<S, BTreeMap<Origin, ConnectionRecord>>(storage, keys::CONNECTED_SITES).await {
        state.connected_sites = sites;
    }
    if let Some(trusted) = load_or_warn::<S, BTreeSet<Origin>>(storage, keys::TRUSTED_SITES).await {
        state.trusted_sites = trusted;
    }
    if let Some(sessions) =
        load_or_warn::<S, Vec<WalletConnectSession>>(storage, keys::WALLET_CONNECT_SESSIONS).await
    {
        state.wallet_connect_sessions = sessions;
    }

    // A record may only claim trust the set agrees with
    for (origin, record) in state.connected_sites.iter_mut() {
        if record.trusted && !state.trusted_sites.contains(origin) {
            record.trusted = false;
        }
    }

    info!(
        "Loaded wallet state: {} account(s), {} connected site(s), chain {}",
        state.accounts.len(),
        state.connected_sites.len(),
        state.selected_chain_id
    );
    state
}

async fn load_or_warn<S: StorageBackend, T: serde::de::DeserializeOwned>(storage: &S, key: &str) -> Option<T> {
    match storage.load::<T>(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", key, e);
            None
        }
    }
}

/// Requests queued by a previous process have no live caller; drop them.
pub async fn discard_stale_requests<S: StorageBackend>(storage: &S) {
    match storage.load::<Vec<PendingRequest>>(keys::PENDING_REQUESTS).await {
        Ok(Some(stale)) if !stale.is_empty() => {
            info!("Discarding {} pending request(s) left by a previous run", stale.len())
        }
        Ok(_) => {}
        Err(e) => debug!("Unreadable pending requests: {}", e),
    }
    for key in [keys::PENDING_REQUESTS, keys::CURRENT_REQUEST] {
        if let Err(e) = storage.remove(key).await {
            warn!("Failed to clear {}: {}", key, e);
        }
    }
}

/// What goes into the `state` blob.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StateBlob<'a> {
    is_unlocked: bool,
    accounts: &'a [String],
    selected_chain_id: &'a str,
    connected_sites: &'a BTreeMap<Origin, ConnectionRecord>,
}

impl<'a> From<&'a GlobalWalletState> for StateBlob<'a> {
    fn from(state: &'a GlobalWalletState) -> Self {
        Self {
            is_unlocked: state.is_unlocked,
            accounts: &state.accounts,
            selected_chain_id: &state.selected_chain_id,
            connected_sites: &state.connected_sites,
        }
    }
}

pub async fn save_state<S: StorageBackend>(storage: &S, state: &GlobalWalletState) -> StorageResult<()> {
    storage.save(keys::STATE, &StateBlob::from(state)).await?;
    storage.save(keys::ACCOUNTS, &state.accounts).await?;
    storage.save(keys::CONNECTED_SITES, &state.connected_sites).await?;
    storage.save(keys::TRUSTED_SITES, &state.trusted_sites).await?;
    storage.save(keys::WALLET_CONNECT_SESSIONS, &state.wallet_connect_sessions).await?;
    Ok(())
}

pub async fn save_queue<S: StorageBackend>(storage: &S, pending: &PendingTable) -> StorageResult<()> {
    storage.save(keys::PENDING_REQUESTS, &pending.requests()).await?;
    match pending.current() {
        Some(current) => storage.save(keys::CURRENT_REQUEST, current).await,
        None => storage.remove(keys::CURRENT_REQUEST).await,
    }
}
