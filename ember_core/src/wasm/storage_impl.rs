// chrome.storage.local-based storage implementation

use crate::error::CoreError;
use crate::storage_trait::{StorageBackend, StorageResult};
use async_trait::async_trait;
use js_sys::{Object, Promise, Reflect};
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = get)]
    fn local_get(keys: &JsValue) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = set)]
    fn local_set(items: &Object) -> Result<Promise, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = remove)]
    fn local_remove(keys: &JsValue) -> Result<Promise, JsValue>;
}

fn storage_error(action: &str, err: JsValue) -> CoreError {
    CoreError::Storage(format!("chrome.storage.local.{} failed: {:?}", action, err))
}

async fn settle(action: &str, promise: Result<Promise, JsValue>) -> StorageResult<JsValue> {
    let promise = promise.map_err(|e| storage_error(action, e))?;
    JsFuture::from(promise).await.map_err(|e| storage_error(action, e))
}

/// Extension storage backend. Values are stored as plain JS objects so the
/// popup can read them with the ordinary extension APIs.
pub struct ExtensionStorage {
    prefix: String,
}

impl ExtensionStorage {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn get_raw(&self, key: &str) -> StorageResult<Option<JsValue>> {
        let full_key = self.full_key(key);
        let items = settle("get", local_get(&JsValue::from_str(&full_key))).await?;
        let value = Reflect::get(&items, &JsValue::from_str(&full_key)).map_err(|e| storage_error("get", e))?;
        Ok(if value.is_undefined() { None } else { Some(value) })
    }
}

#[async_trait(?Send)]
impl StorageBackend for ExtensionStorage {
    async fn save<T: Serialize>(&self, key: &str, data: &T) -> StorageResult<()> {
        let full_key = self.full_key(key);
        let value = data
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| CoreError::Storage(format!("Failed to convert {}: {}", full_key, e)))?;
        let items = Object::new();
        Reflect::set(&items, &JsValue::from_str(&full_key), &value).map_err(|e| storage_error("set", e))?;
        settle("set", local_set(&items)).await?;
        debug!("Saved {}", full_key);
        Ok(())
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(value) = self.get_raw(key).await? else {
            return Ok(None);
        };
        serde_wasm_bindgen::from_value(value)
            .map(Some)
            .map_err(|e| CoreError::Storage(format!("Failed to read {}: {}", self.full_key(key), e)))
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        settle("remove", local_remove(&JsValue::from_str(&self.full_key(key)))).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get_raw(key).await?.is_some())
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        let items = settle("get", local_get(&JsValue::NULL)).await?;
        let mut keys: Vec<String> = Object::keys(&Object::from(items))
            .iter()
            .filter_map(|k| k.as_string())
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
