use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ember_core::{CoreError, ErrorCode};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Origin not allowed: {0}")]
    Forbidden(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Core(CoreError::Rpc(error)) => {
                let status = match error.code {
                    ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
                    ErrorCode::UserRejected => StatusCode::CONFLICT,
                    ErrorCode::InvalidParams | ErrorCode::MethodNotFound => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, Json(json!({ "success": false, "error": error }))).into_response()
            }
            AppError::Core(CoreError::BrokerClosed(msg)) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, Json(json!({ "error": self.to_string() }))).into_response(),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, Json(json!({ "error": self.to_string() }))).into_response(),
            other => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}
