//! Gateway API
//!
//! Node-facing endpoint for executors: pipeline hand-out, heartbeats,
//! result submission, and flag operations. A stateless adapter over the
//! store — all serialization of concurrent updates happens in the
//! database, so the gateway itself needs no concurrency limit.
//!
//! Served on its own port, published through the fleet's network so
//! executors can reach it.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use netunicorn_core::domain::executor::ExecutorState;
use netunicorn_core::domain::flag::FlagValues;
use netunicorn_core::dto::{ExecutorResultRequest, HeartbeatRequest};
use tower_http::trace::TraceLayer;

use crate::api::error::{ApiError, ApiResult};
use crate::api::health;
use crate::repository::{executor as executor_repository, flag as flag_repository};
use crate::state::AppState;

/// Create the gateway router with all executor-facing endpoints
pub fn create_gateway_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health::healthcheck))
        .route("/pipeline/{executor_id}", get(get_pipeline))
        .route("/heartbeat/{executor_id}", post(heartbeat))
        .route("/result/{executor_id}", post(submit_result))
        .route("/experiment/{experiment_id}/flag/{key}", get(get_flag))
        .route("/experiment/{experiment_id}/flag/{key}", post(set_flag))
        .route(
            "/experiment/{experiment_id}/flag/{key}/increment",
            post(increment_flag),
        )
        .route(
            "/experiment/{experiment_id}/flag/{key}/decrement",
            post(decrement_flag),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// GET /pipeline/{executor_id}
/// Serialized pipeline for a started, non-finished executor; 404 otherwise.
async fn get_pipeline(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let pipeline = executor_repository::find_pipeline(&state.pool, &executor_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!("Executor {} requested a pipeline but has none", executor_id);
            ApiError::NotFound("no pipeline for this executor".to_string())
        })?;

    Ok((
        [("content-type", "application/octet-stream")],
        Bytes::from(pipeline),
    ))
}

/// POST /heartbeat/{executor_id}
/// Sets keepalive to now; the body optionally piggybacks the state.
async fn heartbeat(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
    body: Option<Json<HeartbeatRequest>>,
) -> ApiResult<StatusCode> {
    let executor_state = body.and_then(|Json(request)| request.state);
    let known = executor_repository::heartbeat(&state.pool, &executor_id, executor_state).await?;

    if known {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("unknown executor".to_string()))
    }
}

/// POST /result/{executor_id}
/// Stores the final result; the first submission wins, repeats are ignored.
async fn submit_result(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
    Json(request): Json<ExecutorResultRequest>,
) -> ApiResult<StatusCode> {
    let state_value = if request.state.is_finished() {
        request.state
    } else {
        ExecutorState::Terminated
    };

    let known =
        executor_repository::submit_result(&state.pool, &executor_id, state_value, &request.result)
            .await?;

    if known {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("unknown executor".to_string()))
    }
}

// =============================================================================
// Flag Endpoints (executor-facing, addressed by experiment id)
// =============================================================================

/// GET /experiment/{experiment_id}/flag/{key}
async fn get_flag(
    State(state): State<AppState>,
    Path((experiment_id, key)): Path<(String, String)>,
) -> ApiResult<Json<FlagValues>> {
    let values = flag_repository::get(&state.pool, &experiment_id, &key)
        .await?
        .ok_or_else(|| ApiError::NotFound("flag not found".to_string()))?;

    Ok(Json(values))
}

/// POST /experiment/{experiment_id}/flag/{key}
async fn set_flag(
    State(state): State<AppState>,
    Path((experiment_id, key)): Path<(String, String)>,
    Json(values): Json<FlagValues>,
) -> ApiResult<StatusCode> {
    if values.is_empty() {
        return Err(ApiError::BadRequest(
            "either text_value or int_value must be set".to_string(),
        ));
    }

    flag_repository::set(&state.pool, &experiment_id, &key, &values).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /experiment/{experiment_id}/flag/{key}/increment
async fn increment_flag(
    State(state): State<AppState>,
    Path((experiment_id, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    flag_repository::increment(&state.pool, &experiment_id, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /experiment/{experiment_id}/flag/{key}/decrement
async fn decrement_flag(
    State(state): State<AppState>,
    Path((experiment_id, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    flag_repository::decrement(&state.pool, &experiment_id, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}
