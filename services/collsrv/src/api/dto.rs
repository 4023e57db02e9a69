//! API error/response types and status-code mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::error::CollSrvError;

/// HTTP-facing error wrapper
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl From<CollSrvError> for AppError {
    fn from(err: CollSrvError) -> Self {
        let status = match &err {
            CollSrvError::NotFound(_) | CollSrvError::InventoryMiss(_) => StatusCode::NOT_FOUND,
            CollSrvError::Conflict(_) => StatusCode::CONFLICT,
            CollSrvError::Validation(_) | CollSrvError::BadValue(_) => StatusCode::BAD_REQUEST,
            CollSrvError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CollSrvError::Link(_)
            | CollSrvError::NotConnected
            | CollSrvError::Timeout(_)
            | CollSrvError::Sequence(_)
            | CollSrvError::BadFormat(_) => StatusCode::BAD_GATEWAY,
            CollSrvError::Config(_)
            | CollSrvError::Storage(_)
            | CollSrvError::Serialization(_)
            | CollSrvError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<datacoll_rtdb::InventoryError> for AppError {
    fn from(err: datacoll_rtdb::InventoryError) -> Self {
        AppError::from(CollSrvError::from(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Uniform success envelope for mutations
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn json() -> Json<Self> {
        Json(Self { ok: true })
    }
}

/// Query parameters for the sample series endpoint
#[derive(Debug, serde::Deserialize)]
pub struct DataQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}
