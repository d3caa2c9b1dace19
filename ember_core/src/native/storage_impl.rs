// Native file-based storage implementation

use crate::storage_trait::{StorageBackend, StorageResult};
use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::path::PathBuf;
use log::debug;

/// One JSON file per storage key under `base_dir`
pub struct FileStorage {
    base_dir: PathBuf,
}

impl FileStorage {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn get_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", key))
    }
}

#[async_trait(?Send)]
impl StorageBackend for FileStorage {
    async fn save<T: Serialize>(&self, key: &str, data: &T) -> StorageResult<()> {
        let path = self.get_path(key);
        debug!("Saving {} to {:?}", key, path);

        tokio::fs::create_dir_all(&self.base_dir).await
            .map_err(|e| CoreError::Io(format!("Failed to create directory: {}", e)))?;

        let json = serde_json::to_string_pretty(data)?;

        // Write next to the target then rename, so a crash never leaves half a file
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await
            .map_err(|e| CoreError::Io(format!("Failed to write file: {}", e)))?;
        tokio::fs::rename(&tmp, &path).await
            .map_err(|e| CoreError::Io(format!("Failed to replace file: {}", e)))?;

        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let path = self.get_path(key);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("No stored value for {} at {:?}", key, path);
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&path).await
            .map_err(|e| CoreError::Io(format!("Failed to read file: {}", e)))?;

        let data = serde_json::from_str(&json)?;
        debug!("Loaded {} from {:?}", key, path);
        Ok(Some(data))
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.get_path(key);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path).await
                .map_err(|e| CoreError::Io(format!("Failed to remove file: {}", e)))?;
            debug!("Removed {:?}", path);
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.get_path(key);
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        if !tokio::fs::try_exists(&self.base_dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await
            .map_err(|e| CoreError::Io(format!("Failed to read directory: {}", e)))?;

        while let Some(entry) = entries.next_entry().await
            .map_err(|e| CoreError::Io(format!("Failed to read directory entry: {}", e)))? {

            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
