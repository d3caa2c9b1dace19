use crate::error::CoreError;
use crate::models::normalize_chain_id;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// How long a pending approval waits for the user before timing out.
    #[serde(default = "default_approval_ttl_secs")]
    pub approval_ttl_secs: u64,
    /// Client-side timeout for every in-page provider call.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_chain_id")]
    pub default_chain_id: String,
    /// Key prefix used by the browser storage backend.
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,
    // Native host only
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Browser origins allowed to call the native host (CORS). Empty means any.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            approval_ttl_secs: default_approval_ttl_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            default_chain_id: default_chain_id(),
            storage_prefix: default_storage_prefix(),
            storage_dir: default_storage_dir(),
            listen_addr: default_listen_addr(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Settings {
    #[cfg(feature = "native")]
    pub fn from_file(path: &str) -> Result<Self, CoreError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(path));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    #[cfg(feature = "native")]
    pub fn save_to_file(&self, path: &str) -> Result<(), CoreError> {
        let toml_string = toml::to_string(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn approval_ttl(&self) -> Duration {
        Duration::from_secs(self.approval_ttl_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Validate settings ranges and constraints
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.approval_ttl_secs == 0 {
            return Err(CoreError::Validation("approval_ttl_secs must be > 0".to_string()));
        }
        if self.provider_timeout_secs == 0 {
            return Err(CoreError::Validation("provider_timeout_secs must be > 0".to_string()));
        }
        match normalize_chain_id(&serde_json::Value::String(self.default_chain_id.clone())) {
            Some(normalized) if normalized == self.default_chain_id => {}
            _ => {
                return Err(CoreError::Validation(format!(
                    "default_chain_id must be a lowercase hex chain id, got {}",
                    self.default_chain_id
                )))
            }
        }
        if self.storage_prefix.is_empty() {
            return Err(CoreError::Validation("storage_prefix must not be empty".to_string()));
        }
        for origin in &self.allowed_origins {
            if crate::models::origin_of(origin).as_deref() != Some(origin.trim_end_matches('/')) {
                return Err(CoreError::Validation(format!("allowed_origins entry is not an origin: {}", origin)));
            }
        }
        Ok(())
    }
}

fn default_approval_ttl_secs() -> u64 { 300 }
fn default_provider_timeout_secs() -> u64 { 30 }
fn default_chain_id() -> String { crate::models::DEFAULT_CHAIN_ID.to_string() }
fn default_storage_prefix() -> String { "ember_".to_string() }
fn default_storage_dir() -> String { "./ember-data".to_string() }
fn default_listen_addr() -> String { "127.0.0.1:8547".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "native")]
    #[test]
    fn load_example_config() {
        // `config.example.toml` must stay loadable and in sync with the defaults
        let s = Settings::from_file("config.example.toml").unwrap();
        assert_eq!(s.approval_ttl_secs, 300);
        assert_eq!(s.default_chain_id, "0x1");
        assert_eq!(s.allowed_origins, vec!["http://localhost:3000".to_string()]);
        s.validate().unwrap();
    }

    #[cfg(feature = "native")]
    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let path = path.to_str().unwrap();

        let settings = Settings { approval_ttl_secs: 60, default_chain_id: "0x89".into(), ..Settings::default() };
        settings.save_to_file(path).unwrap();
        assert_eq!(Settings::from_file(path).unwrap(), settings);
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.approval_ttl(), Duration::from_secs(300));
        assert_eq!(s.provider_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_bad_values() {
        let zero_ttl = Settings { approval_ttl_secs: 0, ..Settings::default() };
        assert!(zero_ttl.validate().is_err());

        let decimal_chain = Settings { default_chain_id: "137".into(), ..Settings::default() };
        assert!(decimal_chain.validate().is_err());

        let path_origin = Settings { allowed_origins: vec!["https://dapp.test/app".into()], ..Settings::default() };
        assert!(path_origin.validate().is_err());
    }
}
