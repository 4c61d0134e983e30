//! Experiment API Handlers
//!
//! User-facing endpoints for the experiment lifecycle and flags.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use netunicorn_core::domain::experiment::ExperimentInfo;
use netunicorn_core::domain::flag::FlagValues;
use netunicorn_core::dto::{SubmitExperimentRequest, SubmitExperimentResponse};

use crate::api::auth::AuthContext;
use crate::api::error::ApiResult;
use crate::service::experiment as experiment_service;
use crate::state::AppState;

/// POST /experiment
/// Submit a new experiment
pub async fn submit_experiment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<SubmitExperimentRequest>,
) -> ApiResult<(StatusCode, Json<SubmitExperimentResponse>)> {
    tracing::info!("Submitting experiment {} for {}", request.name, auth.username);

    let experiment_id = experiment_service::submit(&state, &auth, &request).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitExperimentResponse { experiment_id }),
    ))
}

/// POST /experiment/{name}/prepare
pub async fn prepare_experiment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    experiment_service::prepare(&state, &auth, &name).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /experiment/{name}/start
pub async fn start_experiment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    experiment_service::start(&state, &auth, &name).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /experiment/{name}/cancel
pub async fn cancel_experiment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    experiment_service::cancel(&state, &auth, &name).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /experiment/{name}
pub async fn experiment_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(name): Path<String>,
) -> ApiResult<Json<ExperimentInfo>> {
    let info = experiment_service::status(&state, &auth, &name).await?;
    Ok(Json(info))
}

/// DELETE /experiment/{name}
pub async fn delete_experiment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    experiment_service::delete(&state, &auth, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Flag Endpoints
// =============================================================================

/// GET /experiment/{name}/flag/{key}
pub async fn get_flag(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((name, key)): Path<(String, String)>,
) -> ApiResult<Json<FlagValues>> {
    let values = experiment_service::get_flag(&state, &auth, &name, &key).await?;
    Ok(Json(values))
}

/// POST /experiment/{name}/flag/{key}
pub async fn set_flag(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((name, key)): Path<(String, String)>,
    Json(values): Json<FlagValues>,
) -> ApiResult<StatusCode> {
    experiment_service::set_flag(&state, &auth, &name, &key, &values).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /experiment/{name}/flag/{key}/increment
pub async fn increment_flag(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((name, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    experiment_service::increment_flag(&state, &auth, &name, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /experiment/{name}/flag/{key}/decrement
pub async fn decrement_flag(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((name, key)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    experiment_service::decrement_flag(&state, &auth, &name, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}
