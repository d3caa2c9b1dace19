// Storage abstraction - file-based (native), chrome.storage (WASM) or memory

use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, CoreError>;

/// Abstract key-value storage backend
/// The broker is the only writer of wallet state; other contexts read through messages
#[async_trait(?Send)]
pub trait StorageBackend {
    /// Save data with a key
    async fn save<T: Serialize>(&self, key: &str, data: &T) -> StorageResult<()>;

    /// Load data by key
    async fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>>;

    /// Remove data by key
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// List all keys (optional, may not be supported by all backends)
    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Storage keys of the persisted wallet state
pub mod keys {
    /// Whole `GlobalWalletState`; the separate keys below win over it on load.
    pub const STATE: &str = "state";
    pub const ACCOUNTS: &str = "accounts";
    pub const CONNECTED_SITES: &str = "connectedSites";
    pub const WALLET_CONNECT_SESSIONS: &str = "walletConnectSessions";
    pub const TRUSTED_SITES: &str = "trustedSites";
    /// Best-effort copy of the approval queue for popup recovery.
    pub const PENDING_REQUESTS: &str = "pendingRequests";
    pub const CURRENT_REQUEST: &str = "currentRequest";
}

/// In-process backend for tests and `--ephemeral` runs. Values are kept as
/// JSON text so they go through the same serde path as the real backends.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored JSON, for inspection in tests.
    pub fn raw(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.borrow();
        serde_json::from_str(entries.get(key)?).ok()
    }
}

#[async_trait(?Send)]
impl StorageBackend for MemoryStorage {
    async fn save<T: Serialize>(&self, key: &str, data: &T) -> StorageResult<()> {
        let json = serde_json::to_string(data)?;
        self.entries.borrow_mut().insert(key.to_string(), json);
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let json = match self.entries.borrow().get(key) {
            Some(json) => json.clone(),
            None => return Ok(None),
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.borrow().contains_key(key))
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_round_trip_and_remove() {
        let storage = MemoryStorage::new();
        storage.save(keys::ACCOUNTS, &vec!["0xabc".to_string()]).await.unwrap();

        let loaded: Option<Vec<String>> = storage.load(keys::ACCOUNTS).await.unwrap();
        assert_eq!(loaded, Some(vec!["0xabc".to_string()]));
        assert_eq!(storage.list_keys().await.unwrap(), vec![keys::ACCOUNTS.to_string()]);

        storage.remove(keys::ACCOUNTS).await.unwrap();
        assert!(!storage.exists(keys::ACCOUNTS).await.unwrap());
        let missing: Option<Vec<String>> = storage.load(keys::ACCOUNTS).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn memory_storage_reports_type_mismatch() {
        let storage = MemoryStorage::new();
        storage.save(keys::STATE, &"not a state").await.unwrap();
        let loaded: StorageResult<Option<Vec<String>>> = storage.load(keys::STATE).await;
        assert!(matches!(loaded, Err(CoreError::Json(_))));
    }
}
