//! Experiment Processor
//!
//! The supervisor loop that advances every non-terminal experiment through
//! its lifecycle and detects dead executors. Transitions of one experiment
//! are serialized through a per-experiment advisory lock, so additional
//! processor replicas never race on the same experiment.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use netunicorn_core::domain::experiment::{DeploymentExecutionResult, ExperimentStatus};
use sqlx::PgPool;

use crate::repository::compilation as compilation_repository;
use crate::repository::executor::{self as executor_repository, ExecutorRecord};
use crate::repository::experiment::{self as experiment_repository, ExperimentRecord};
use crate::repository::lock as lock_repository;
use crate::service::infrastructure;
use crate::state::AppState;

const PREPARING_WATCHDOG_MAX_AGE_HOURS: i64 = 24;

/// Advisory lease on one experiment id, held for the duration of a
/// transition. The session-level lock dies with the pooled connection.
struct ExperimentLease {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
}

impl ExperimentLease {
    async fn try_acquire(pool: &PgPool, experiment_id: &str) -> Result<Option<Self>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(experiment_id)
            .fetch_one(&mut *conn)
            .await?;

        if locked {
            Ok(Some(Self { conn }))
        } else {
            Ok(None)
        }
    }

    async fn release(mut self, experiment_id: &str) {
        let _ = sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(experiment_id)
            .execute(&mut *self.conn)
            .await;
    }
}

/// Deadline after which a silent executor is considered dead.
///
/// The per-deployment keep-alive timeout is the outer wall-clock envelope
/// and wins when set; otherwise the executor must check in within twice the
/// heartbeat interval, with a floor of one minute.
pub fn keepalive_deadline(
    heartbeat_interval: Duration,
    keep_alive_timeout_minutes: Option<u32>,
) -> chrono::Duration {
    match keep_alive_timeout_minutes {
        Some(minutes) => chrono::Duration::minutes(minutes as i64),
        None => {
            let seconds = (2 * heartbeat_interval.as_secs()).max(60);
            chrono::Duration::seconds(seconds as i64)
        }
    }
}

/// Runs the supervisor loop forever.
pub async fn run_processor(state: AppState) {
    let tick = Duration::from_secs(state.config.processor.tick_seconds);
    tracing::info!("Experiment processor started (tick {:?})", tick);

    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;

        if let Err(e) = advance_preparing_experiments(&state).await {
            tracing::error!("Processor failed on preparing experiments: {}", e);
        }
        if let Err(e) = advance_running_experiments(&state).await {
            tracing::error!("Processor failed on running experiments: {}", e);
        }
        match experiment_repository::expire_stuck_preparing(
            &state.pool,
            chrono::Duration::hours(PREPARING_WATCHDOG_MAX_AGE_HOURS),
        )
        .await
        {
            Ok(expired) => {
                for experiment_id in expired {
                    tracing::warn!("Experiment {} timed out during preparation", experiment_id);
                }
            }
            Err(e) => tracing::error!("Preparing watchdog failed: {}", e),
        }
    }
}

async fn advance_preparing_experiments(state: &AppState) -> Result<(), sqlx::Error> {
    let records =
        experiment_repository::list_by_status(&state.pool, ExperimentStatus::Preparing).await?;

    for record in records {
        let Some(lease) = ExperimentLease::try_acquire(&state.pool, &record.experiment_id).await?
        else {
            continue;
        };

        let result = settle_preparing(state, &record).await;
        lease.release(&record.experiment_id).await;

        if let Err(e) = result {
            tracing::error!(
                "Failed to settle preparing experiment {}: {}",
                record.experiment_id,
                e
            );
        }
    }

    Ok(())
}

/// Moves one PREPARING experiment forward once all its compilations are
/// terminal: deployments are marked from their compilation outcomes, the
/// environments are distributed, and the experiment becomes READY — or
/// FINISHED with an aggregate error when nothing compiled.
async fn settle_preparing(state: &AppState, record: &ExperimentRecord) -> Result<(), sqlx::Error> {
    let statuses =
        compilation_repository::statuses_for_experiment(&state.pool, &record.experiment_id).await?;

    if statuses.is_empty() || !statuses.iter().all(|s| s.is_terminal()) {
        return Ok(());
    }

    let by_id: HashMap<&str, &compilation_repository::CompilationStatus> = statuses
        .iter()
        .map(|s| (s.compilation_id.as_str(), s))
        .collect();

    let mut experiment = record.experiment.clone();
    for deployment in &mut experiment.deployments {
        let compilation_id = deployment.compilation_id();
        match by_id.get(compilation_id.as_str()) {
            Some(status) if status.succeeded() => {
                deployment.prepared = true;
            }
            Some(status) => {
                deployment.prepared = false;
                deployment.error = Some(format!(
                    "compilation failed: {}",
                    status.result.as_deref().unwrap_or("no build log")
                ));
            }
            None => {
                deployment.prepared = false;
                deployment.error = Some("compilation record missing".to_string());
            }
        }
    }

    if record.cancelled {
        experiment_repository::set_data(&state.pool, &record.experiment_id, &experiment).await?;
        finish_experiment(state, record, Some("experiment was cancelled")).await?;
        return Ok(());
    }

    if experiment.deployments.iter().all(|d| !d.prepared) {
        experiment_repository::set_data(&state.pool, &record.experiment_id, &experiment).await?;
        finish_experiment(state, record, Some("all deployments failed compilation")).await?;
        tracing::warn!(
            "Experiment {} finished: every deployment failed compilation",
            record.experiment_id
        );
        return Ok(());
    }

    if let Err(e) =
        infrastructure::deploy_experiment(state, &record.experiment_id, &mut experiment).await
    {
        tracing::error!(
            "Deployment fan-out for experiment {} failed: {}",
            record.experiment_id,
            e
        );
    }

    experiment_repository::set_data(&state.pool, &record.experiment_id, &experiment).await?;
    experiment_repository::transition_status(
        &state.pool,
        &record.experiment_id,
        ExperimentStatus::Preparing,
        ExperimentStatus::Ready,
    )
    .await?;

    tracing::info!("Experiment {} is ready", record.experiment_id);
    Ok(())
}

async fn advance_running_experiments(state: &AppState) -> Result<(), sqlx::Error> {
    let records =
        experiment_repository::list_by_status(&state.pool, ExperimentStatus::Running).await?;

    for record in records {
        let Some(lease) = ExperimentLease::try_acquire(&state.pool, &record.experiment_id).await?
        else {
            continue;
        };

        let result = settle_running(state, &record).await;
        lease.release(&record.experiment_id).await;

        if let Err(e) = result {
            tracing::error!(
                "Failed to settle running experiment {}: {}",
                record.experiment_id,
                e
            );
        }
    }

    Ok(())
}

/// Checks liveness of every executor of one RUNNING experiment and finishes
/// the experiment once none are alive.
async fn settle_running(state: &AppState, record: &ExperimentRecord) -> Result<(), sqlx::Error> {
    let executors =
        executor_repository::list_for_experiment(&state.pool, &record.experiment_id).await?;

    let heartbeat_interval =
        Duration::from_secs(state.config.processor.heartbeat_interval_seconds);
    let timeouts: HashMap<&str, Option<u32>> = record
        .experiment
        .deployments
        .iter()
        .filter_map(|d| {
            d.executor_id
                .as_deref()
                .map(|id| (id, d.keep_alive_timeout_minutes))
        })
        .collect();

    let started = record.start_time.unwrap_or(record.creation_time);
    let now = Utc::now();
    let mut alive = false;

    for executor in executors.iter().filter(|e| !e.finished) {
        let keep_alive = timeouts.get(executor.executor_id.as_str()).copied().flatten();
        let deadline = keepalive_deadline(heartbeat_interval, keep_alive);
        let last_seen = executor.keepalive_time.unwrap_or(started);

        if last_seen + deadline < now {
            tracing::warn!(
                "Executor {} of experiment {} missed its liveness deadline",
                executor.executor_id,
                record.experiment_id
            );
            executor_repository::mark_failed(
                &state.pool,
                &executor.executor_id,
                "executor missed its liveness deadline",
            )
            .await?;
        } else {
            alive = true;
        }
    }

    if alive {
        return Ok(());
    }

    let executors =
        executor_repository::list_for_experiment(&state.pool, &record.experiment_id).await?;
    let results = collect_execution_results(record, &executors);
    experiment_repository::set_execution_results(&state.pool, &record.experiment_id, &results)
        .await?;

    let cancel_marker = record.cancelled.then_some("experiment was cancelled");
    finish_experiment(state, record, cancel_marker).await?;
    tracing::info!("Experiment {} finished", record.experiment_id);
    Ok(())
}

/// Builds the per-deployment result vector from executor rows.
pub fn collect_execution_results(
    record: &ExperimentRecord,
    executors: &[ExecutorRecord],
) -> Vec<DeploymentExecutionResult> {
    let by_id: HashMap<&str, &ExecutorRecord> = executors
        .iter()
        .map(|e| (e.executor_id.as_str(), e))
        .collect();

    record
        .experiment
        .deployments
        .iter()
        .map(|deployment| {
            let row = deployment
                .executor_id
                .as_deref()
                .and_then(|id| by_id.get(id));
            DeploymentExecutionResult {
                node_name: deployment.node.name.clone(),
                executor_id: deployment.executor_id.clone(),
                result: row.and_then(|r| r.result.clone()),
                error: row
                    .and_then(|r| r.error.clone())
                    .or_else(|| deployment.error.clone()),
            }
        })
        .collect()
}

/// Terminal transition: status, error marker, connector cleanup, lock
/// release. Cleanup failures are logged and never block the transition.
///
/// Every path into FINISHED goes through here, including user cancellation
/// of experiments that never started running.
pub(crate) async fn finish_experiment(
    state: &AppState,
    record: &ExperimentRecord,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    if let Some(error) = error {
        experiment_repository::set_error(&state.pool, &record.experiment_id, error).await?;
    }
    experiment_repository::set_status(&state.pool, &record.experiment_id, ExperimentStatus::Finished)
        .await?;

    infrastructure::cleanup_experiment(state, record).await;
    experiment_repository::mark_cleaned(&state.pool, &record.experiment_id).await?;

    let released = lock_repository::release_for_experiment(&state.pool, &record.experiment_id).await?;
    if released > 0 {
        tracing::debug!(
            "Released {} locks of experiment {}",
            released,
            record.experiment_id
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netunicorn_core::domain::deployment::Deployment;
    use netunicorn_core::domain::environment::EnvironmentDefinition;
    use netunicorn_core::domain::experiment::Experiment;
    use netunicorn_core::domain::node::Node;
    use netunicorn_core::domain::pipeline::Pipeline;
    use netunicorn_core::domain::task::TaskSpec;

    #[test]
    fn default_deadline_is_twice_heartbeat_with_floor() {
        assert_eq!(
            keepalive_deadline(Duration::from_secs(30), None),
            chrono::Duration::seconds(60)
        );
        assert_eq!(
            keepalive_deadline(Duration::from_secs(45), None),
            chrono::Duration::seconds(90)
        );
        assert_eq!(
            keepalive_deadline(Duration::from_secs(5), None),
            chrono::Duration::seconds(60)
        );
    }

    #[test]
    fn keep_alive_timeout_overrides_the_default() {
        assert_eq!(
            keepalive_deadline(Duration::from_secs(30), Some(10)),
            chrono::Duration::minutes(10)
        );
    }

    fn record_with_deployments(deployments: Vec<Deployment>) -> ExperimentRecord {
        ExperimentRecord {
            experiment_id: "exp-1".to_string(),
            username: "alice".to_string(),
            experiment_name: "test".to_string(),
            status: ExperimentStatus::Running,
            experiment: Experiment { deployments },
            error: None,
            creation_time: Utc::now(),
            start_time: Some(Utc::now()),
            execution_results: None,
            cancelled: false,
        }
    }

    fn executor_row(executor_id: &str, result: Option<&[u8]>, error: Option<&str>) -> ExecutorRecord {
        ExecutorRecord {
            executor_id: executor_id.to_string(),
            node_name: "node-1".to_string(),
            connector: "local".to_string(),
            result: result.map(|r| r.to_vec()),
            keepalive_time: None,
            error: error.map(String::from),
            finished: true,
        }
    }

    #[test]
    fn results_cover_every_deployment_verbatim() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell()).then(TaskSpec::new("noop"));
        let mut ok = Deployment::new(Node::new("node-1", "local"), &pipeline);
        ok.executor_id = Some("exec-1".to_string());
        let mut failed = Deployment::new(Node::new("node-2", "local"), &pipeline);
        failed.executor_id = Some("exec-2".to_string());
        failed.error = Some("compilation failed: broken".to_string());

        let record = record_with_deployments(vec![ok, failed]);
        let executors = vec![
            executor_row("exec-1", Some(b"\x01\x02result"), None),
            executor_row("exec-2", None, None),
        ];

        let results = collect_execution_results(&record, &executors);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result.as_deref(), Some(&b"\x01\x02result"[..]));
        assert_eq!(results[0].error, None);
        assert_eq!(
            results[1].error.as_deref(),
            Some("compilation failed: broken")
        );
    }

    #[test]
    fn executor_row_error_wins_over_deployment_error() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell()).then(TaskSpec::new("noop"));
        let mut deployment = Deployment::new(Node::new("node-1", "local"), &pipeline);
        deployment.executor_id = Some("exec-1".to_string());

        let record = record_with_deployments(vec![deployment]);
        let executors = vec![executor_row(
            "exec-1",
            None,
            Some("executor missed its liveness deadline"),
        )];

        let results = collect_execution_results(&record, &executors);
        assert_eq!(
            results[0].error.as_deref(),
            Some("executor missed its liveness deadline")
        );
    }
}
