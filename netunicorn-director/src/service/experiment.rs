//! Experiment Service
//!
//! Business logic behind the mediator: submission, lifecycle commands,
//! status, deletion, and flag access. Authorization is owner match or the
//! sudo bit; a missing experiment and a foreign experiment produce the same
//! answer so nothing leaks about what exists.

use netunicorn_core::domain::experiment::{Experiment, ExperimentInfo, ExperimentStatus};
use netunicorn_core::domain::flag::FlagValues;
use netunicorn_core::dto::SubmitExperimentRequest;
use thiserror::Error;
use uuid::Uuid;

use crate::api::auth::AuthContext;
use crate::repository::experiment::{self as experiment_repository, ExperimentRecord};
use crate::repository::lock::{self as lock_repository, ClaimOutcome};
use crate::repository::{
    compilation as compilation_repository, executor as executor_repository,
    flag as flag_repository,
};
use crate::service::{infrastructure, processor};
use crate::state::AppState;

/// Service error type
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("experiment not found")]
    NotFound,
    #[error("experiment name {0} already exists")]
    NameTaken(String),
    #[error("experiment is in status {actual}, expected {expected}")]
    InvalidState {
        expected: ExperimentStatus,
        actual: ExperimentStatus,
    },
    #[error("{0}")]
    Validation(String),
    #[error("nodes are already locked by another experiment")]
    LockConflict(Vec<(String, String)>),
    #[error("flag not found")]
    FlagNotFound,
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Validates a submitted experiment before anything is persisted.
pub fn validate_experiment(state: &AppState, experiment: &Experiment) -> Result<(), String> {
    if experiment.is_empty() {
        return Err("experiment contains no deployments".to_string());
    }

    for deployment in &experiment.deployments {
        if deployment.node.name.is_empty() {
            return Err("deployment references an unnamed node".to_string());
        }
        if state.registry.get(&deployment.node.connector).is_none() {
            return Err(format!(
                "node {} belongs to unknown connector {}",
                deployment.node.name, deployment.node.connector
            ));
        }
        if deployment.pipeline.is_empty() {
            return Err(format!(
                "deployment to node {} carries an empty pipeline",
                deployment.node.name
            ));
        }
    }

    Ok(())
}

/// Persists a new experiment in CREATED status.
pub async fn submit(
    state: &AppState,
    auth: &AuthContext,
    request: &SubmitExperimentRequest,
) -> Result<String, ExperimentError> {
    if request.name.is_empty() {
        return Err(ExperimentError::Validation(
            "experiment name must not be empty".to_string(),
        ));
    }
    validate_experiment(state, &request.experiment).map_err(ExperimentError::Validation)?;

    let experiment_id = Uuid::new_v4().to_string();
    experiment_repository::create(
        &state.pool,
        &experiment_id,
        &auth.username,
        &request.name,
        &request.experiment,
    )
    .await
    .map_err(|e| {
        if experiment_repository::is_unique_name_violation(&e) {
            ExperimentError::NameTaken(request.name.clone())
        } else {
            ExperimentError::Database(e)
        }
    })?;

    tracing::info!(
        "Experiment {} ({}) submitted by {}",
        request.name,
        experiment_id,
        auth.username
    );
    Ok(experiment_id)
}

/// Finds an experiment the caller may act on: their own, or any when sudo.
pub async fn find_authorized(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
) -> Result<ExperimentRecord, ExperimentError> {
    if let Some(record) =
        experiment_repository::find_by_name(&state.pool, &auth.username, experiment_name).await?
    {
        return Ok(record);
    }

    if auth.sudo {
        if let Some(record) =
            experiment_repository::find_by_name_any_user(&state.pool, experiment_name).await?
        {
            return Ok(record);
        }
    }

    Err(ExperimentError::NotFound)
}

fn require_status(
    record: &ExperimentRecord,
    expected: ExperimentStatus,
) -> Result<(), ExperimentError> {
    if record.status == expected {
        Ok(())
    } else {
        Err(ExperimentError::InvalidState {
            expected,
            actual: record.status,
        })
    }
}

/// Reserves nodes and enqueues compilations; CREATED → PREPARING.
///
/// Locks are all-or-nothing: on any conflict the claim is rolled back and
/// the conflicting nodes are reported so the user can retry later.
pub async fn prepare(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
) -> Result<(), ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;
    require_status(&record, ExperimentStatus::Created)?;

    let pairs: Vec<(String, String)> = record
        .experiment
        .deployments
        .iter()
        .map(|d| (d.node.name.clone(), d.node.connector.clone()))
        .collect();

    match lock_repository::claim_all(&state.pool, &record.username, &record.experiment_id, &pairs)
        .await?
    {
        ClaimOutcome::Granted => {}
        ClaimOutcome::Conflicts(conflicts) => {
            return Err(ExperimentError::LockConflict(conflicts));
        }
    }

    for deployment in &record.experiment.deployments {
        let compilation_id = deployment.compilation_id();
        let architecture = deployment.node.architecture.as_str();

        if deployment.environment_definition.requires_build() {
            compilation_repository::enqueue(
                &state.pool,
                &record.experiment_id,
                &compilation_id,
                architecture,
                &deployment.pipeline,
                &deployment.environment_definition,
            )
            .await?;
        } else {
            compilation_repository::enqueue_settled(
                &state.pool,
                &record.experiment_id,
                &compilation_id,
                architecture,
                &deployment.pipeline,
                &deployment.environment_definition,
                "no build required for shell environments",
            )
            .await?;
        }
    }

    experiment_repository::transition_status(
        &state.pool,
        &record.experiment_id,
        ExperimentStatus::Created,
        ExperimentStatus::Preparing,
    )
    .await?;

    tracing::info!(
        "Experiment {} ({}) is preparing",
        record.experiment_name,
        record.experiment_id
    );
    Ok(())
}

/// READY → RUNNING via the infrastructure service.
pub async fn start(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
) -> Result<(), ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;
    require_status(&record, ExperimentStatus::Ready)?;

    infrastructure::start_experiment(state, &record)
        .await
        .map_err(|e| match e {
            infrastructure::InfraError::Database(e) => ExperimentError::Database(e),
            other => ExperimentError::Validation(other.to_string()),
        })?;

    tracing::info!("Experiment {} started", record.experiment_id);
    Ok(())
}

/// Cooperative cancellation.
///
/// RUNNING experiments get a stop fan-out and finish through the processor
/// once their executors stop reporting; experiments that never started are
/// finished immediately.
pub async fn cancel(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
) -> Result<(), ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;
    if record.status.is_terminal() {
        return Err(ExperimentError::InvalidState {
            expected: ExperimentStatus::Running,
            actual: record.status,
        });
    }

    experiment_repository::mark_cancelled(&state.pool, &record.experiment_id).await?;

    match record.status {
        ExperimentStatus::Running => {
            infrastructure::stop_experiment(state, &record)
                .await
                .map_err(|e| match e {
                    infrastructure::InfraError::Database(e) => ExperimentError::Database(e),
                    other => ExperimentError::Validation(other.to_string()),
                })?;
        }
        ExperimentStatus::Preparing => {
            // compilations may still settle; the processor observes the
            // cancel marker and finishes the experiment
        }
        _ => {
            // CREATED or READY: nothing is running, but a READY experiment
            // has already been deployed, so the full terminal transition
            // (cleanup included) applies here too
            processor::finish_experiment(state, &record, Some("experiment was cancelled"))
                .await?;
        }
    }

    tracing::info!("Experiment {} cancelled by {}", record.experiment_id, auth.username);
    Ok(())
}

/// Full status answer; RUNNING experiments get live results from the
/// executor rows.
pub async fn status(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
) -> Result<ExperimentInfo, ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;

    let execution_results = match record.status {
        ExperimentStatus::Running => {
            let executors =
                executor_repository::list_for_experiment(&state.pool, &record.experiment_id)
                    .await?;
            Some(processor::collect_execution_results(&record, &executors))
        }
        _ => record.execution_results.clone(),
    };

    Ok(ExperimentInfo {
        experiment_id: record.experiment_id,
        status: record.status,
        deployments: record.experiment.deployments,
        execution_results,
        error: record.error,
    })
}

/// Soft delete of a terminal experiment.
pub async fn delete(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
) -> Result<(), ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;
    if !record.status.is_terminal() {
        return Err(ExperimentError::InvalidState {
            expected: ExperimentStatus::Finished,
            actual: record.status,
        });
    }

    experiment_repository::soft_delete(&state.pool, &record.experiment_id).await?;
    compilation_repository::delete_for_experiment(&state.pool, &record.experiment_id).await?;
    tracing::info!("Experiment {} deleted", record.experiment_id);
    Ok(())
}

// =============================================================================
// Flags (user-facing, resolved by experiment name)
// =============================================================================

pub async fn get_flag(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
    key: &str,
) -> Result<FlagValues, ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;
    flag_repository::get(&state.pool, &record.experiment_id, key)
        .await?
        .ok_or(ExperimentError::FlagNotFound)
}

pub async fn set_flag(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
    key: &str,
    values: &FlagValues,
) -> Result<(), ExperimentError> {
    if values.is_empty() {
        return Err(ExperimentError::Validation(
            "either text_value or int_value must be set".to_string(),
        ));
    }
    let record = find_authorized(state, auth, experiment_name).await?;
    flag_repository::set(&state.pool, &record.experiment_id, key, values).await?;
    Ok(())
}

pub async fn increment_flag(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
    key: &str,
) -> Result<(), ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;
    flag_repository::increment(&state.pool, &record.experiment_id, key).await?;
    Ok(())
}

pub async fn decrement_flag(
    state: &AppState,
    auth: &AuthContext,
    experiment_name: &str,
    key: &str,
) -> Result<(), ExperimentError> {
    let record = find_authorized(state, auth, experiment_name).await?;
    flag_repository::decrement(&state.pool, &record.experiment_id, key).await?;
    Ok(())
}
