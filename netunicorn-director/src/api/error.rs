//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::service::experiment::ExperimentError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    /// Authentication or authorization failed; always the same answer, so
    /// nothing leaks about what exists.
    Unauthorized,
    NotFound(String),
    BadRequest(String),
    /// Resource contention, with the conflicting `(node, connector)` pairs.
    LockConflict(Vec<(String, String)>),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [("WWW-Authenticate", "Basic")],
                Json(serde_json::json!({ "error": "authentication failed" })),
            )
                .into_response(),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            ApiError::LockConflict(conflicts) => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": "nodes are already locked by another experiment",
                    "conflicts": conflicts
                        .into_iter()
                        .map(|(node, connector)| serde_json::json!({
                            "node": node,
                            "connector": connector,
                        }))
                        .collect::<Vec<_>>(),
                })),
            )
                .into_response(),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": msg })),
                )
                    .into_response()
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<ExperimentError> for ApiError {
    fn from(err: ExperimentError) -> Self {
        match err {
            ExperimentError::NotFound => ApiError::NotFound("experiment not found".to_string()),
            ExperimentError::FlagNotFound => ApiError::NotFound("flag not found".to_string()),
            ExperimentError::NameTaken(name) => {
                ApiError::BadRequest(format!("experiment name {} already exists", name))
            }
            ExperimentError::InvalidState { expected, actual } => ApiError::BadRequest(format!(
                "experiment is in status {}, expected {}",
                actual, expected
            )),
            ExperimentError::Validation(msg) => ApiError::BadRequest(msg),
            ExperimentError::LockConflict(conflicts) => ApiError::LockConflict(conflicts),
            ExperimentError::Database(err) => ApiError::DatabaseError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
