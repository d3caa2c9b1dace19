//! JSON-RPC style error object carried across every context boundary.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{borrow::Cow, fmt};

/// Error shape a page ultimately sees on a rejected promise: `{code, message}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: Cow<'static, str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// New [`RpcError`] with the default message for `code`.
    pub const fn new(code: ErrorCode) -> Self {
        Self { message: Cow::Borrowed(code.message()), code, data: None }
    }

    pub fn with_message<M>(code: ErrorCode, message: M) -> Self
    where
        M: Into<String>,
    {
        Self { code, message: message.into().into(), data: None }
    }

    /// 4001, the user declined.
    pub const fn user_rejected() -> Self {
        Self::new(ErrorCode::UserRejected)
    }

    /// 4100, the origin has no completed connection.
    pub const fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized)
    }

    /// 4900, the provider lost its connection to the wallet.
    pub const fn disconnected() -> Self {
        Self::new(ErrorCode::Disconnected)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::with_message(ErrorCode::MethodNotFound, format!("Method {} not supported", method))
    }

    pub fn invalid_params<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error_with<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::with_message(ErrorCode::InternalError, message)
    }

    /// Approval window elapsed without a user decision.
    pub const fn timed_out() -> Self {
        Self { code: ErrorCode::InternalError, message: Cow::Borrowed("Request timed out"), data: None }
    }

    /// Synthesized locally when the channel to the broker itself fails.
    pub fn transport<E: fmt::Display>(err: E) -> Self {
        Self::internal_error_with(format!("Internal error: {}", err))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code.code())
    }
}

impl std::error::Error for RpcError {}

/// Error codes used by the provider protocol (EIP-1193 + JSON-RPC 2.0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    UserRejected,
    Unauthorized,
    Disconnected,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Anything else a collaborator reported.
    Other(i64),
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match *self {
            Self::UserRejected => 4001,
            Self::Unauthorized => 4100,
            Self::Disconnected => 4900,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::Other(c) => c,
        }
    }

    pub const fn message(&self) -> &'static str {
        match *self {
            Self::UserRejected => "User rejected the request",
            Self::Unauthorized => "The requested account and/or method has not been authorized by the user",
            Self::Disconnected => "The provider is disconnected",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::Other(_) => "Server error",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.code())
    }
}

impl<'a> Deserialize<'a> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'a>,
    {
        i64::deserialize(deserializer).map(Into::into)
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            4001 => Self::UserRejected,
            4100 => Self::Unauthorized,
            4900 => Self::Disconnected,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            _ => Self::Other(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_as_numeric_code() {
        let err = RpcError::user_rejected();
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"code": 4001, "message": "User rejected the request"})
        );
    }

    #[test]
    fn unknown_codes_survive_a_round_trip() {
        let err: RpcError = serde_json::from_value(json!({"code": -32000, "message": "nonce too low"})).unwrap();
        assert_eq!(err.code, ErrorCode::Other(-32000));
        assert_eq!(err.code.code(), -32000);
    }

    #[test]
    fn method_not_found_names_the_method() {
        let err = RpcError::method_not_found("eth_foo");
        assert_eq!(err.code.code(), -32601);
        assert_eq!(err.message, "Method eth_foo not supported");
    }
}
