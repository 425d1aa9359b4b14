//! HTTP error mapping: every internal error kind becomes a fixed status
//! code and a small opaque string. The mobile client switches on the
//! status, never on message text, and internals are never exposed.

use alfred_core::error::ErrorKind;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

pub struct ApiError {
    kind: ErrorKind,
    /// Logged, never sent to the client.
    detail: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, "not found")
    }

    pub fn unauthenticated() -> Self {
        Self::new(ErrorKind::Unauthenticated, "missing or expired session")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.kind == ErrorKind::Internal {
            error!(detail = %self.detail, "internal error");
        }
        (status, Json(json!({ "error": self.kind.code() }))).into_response()
    }
}

impl From<alfred_store::StoreError> for ApiError {
    fn from(e: alfred_store::StoreError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<alfred_engine::EngineError> for ApiError {
    fn from(e: alfred_engine::EngineError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<alfred_google::GoogleError> for ApiError {
    fn from(e: alfred_google::GoogleError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<alfred_clients::ClientError> for ApiError {
    fn from(e: alfred_clients::ClientError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
