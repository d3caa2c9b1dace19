use thiserror::Error;

use crate::protocol::RpcError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[cfg(feature = "native")]
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[cfg(feature = "native")]
    #[error("I/O error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Broker unavailable: {0}")]
    BrokerClosed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Request failed: {0}")]
    Rpc(RpcError),
}

impl CoreError {
    /// Map any core failure onto the wire error a page is allowed to see.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            CoreError::Rpc(err) => err.clone(),
            CoreError::InvalidInput(msg) | CoreError::Validation(msg) => RpcError::invalid_params(msg.clone()),
            other => RpcError::internal_error_with(format!("Internal error: {}", other)),
        }
    }
}

impl From<RpcError> for CoreError {
    fn from(err: RpcError) -> Self {
        CoreError::Rpc(err)
    }
}

#[cfg(feature = "native")]
impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

#[cfg(feature = "native")]
impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CoreError {
    fn from(err: toml::ser::Error) -> Self {
        CoreError::TomlSerialization(err.to_string())
    }
}
