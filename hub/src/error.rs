use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for hub API responses.
#[derive(Debug)]
pub enum HubError {
    /// Tenant, session or slot no longer exists.
    NotFound(String),
    BadRequest(String),
    Unauthorized,
    /// Directory create/delete/write failure. Left for the caller to retry.
    Storage(String),
    /// Complete list of violated configuration rules.
    Validation(Vec<String>),
    Internal(String),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "not_found: {msg}"),
            Self::BadRequest(msg) => write!(f, "bad_request: {msg}"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Storage(msg) => write!(f, "storage_error: {msg}"),
            Self::Validation(errors) => write!(f, "invalid_config: {}", errors.join("; ")),
            Self::Internal(msg) => write!(f, "internal_error: {msg}"),
        }
    }
}

impl std::error::Error for HubError {}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "success": false, "error": msg })),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "success": false, "error": msg })),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "success": false, "error": "unauthorized" }),
            ),
            Self::Storage(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": format!("storage_error:{msg}") }),
            ),
            Self::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "success": false, "error": "invalid configuration", "errors": errors }),
            ),
            Self::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": msg }),
            ),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<std::io::Error> for HubError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
