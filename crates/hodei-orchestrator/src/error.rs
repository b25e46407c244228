//! HTTP-boundary error mapping. The wire protocol itself reports failure
//! via `WorkerMessage`/job state, not HTTP status codes; this only covers
//! the thin operator-facing HTTP surface (health, job submission).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<hodei_core::Error> for ApiError {
    fn from(err: hodei_core::Error) -> Self {
        match &err {
            hodei_core::Error::InvalidDefinition(msg) => ApiError::BadRequest(msg.clone()),
            hodei_core::Error::MissingArtifact(msg) => ApiError::NotFound(msg.clone()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
