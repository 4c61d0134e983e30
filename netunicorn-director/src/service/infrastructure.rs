//! Infrastructure Service
//!
//! Fronts the connector registry with locking, grouping, deadlines, and
//! per-connector concurrency caps. All fan-out to the fleet goes through
//! here; per-deployment outcomes are recorded on the experiment data and the
//! executor rows.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use netunicorn_core::domain::deployment::Deployment;
use netunicorn_core::domain::experiment::{Experiment, ExperimentStatus};
use netunicorn_core::domain::node::Node;
use thiserror::Error;
use uuid::Uuid;

use crate::connectors::StopExecutorRequest;
use crate::repository::experiment::ExperimentRecord;
use crate::repository::{executor as executor_repository, experiment as experiment_repository};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("connector {0} is not available")]
    ConnectorUnavailable(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// Runs a connector call under the configured hard deadline.
///
/// Exceeding the deadline yields an `Err(timeout)` result instead of
/// blocking the caller indefinitely.
async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| "connector call exceeded its deadline".to_string())
}

fn connector_deadline(state: &AppState) -> Duration {
    Duration::from_secs(state.config.processor.connector_deadline_seconds)
}

/// Groups deployments by their owning connector, keeping only those the
/// filter admits.
pub fn group_by_connector<'a>(
    deployments: impl IntoIterator<Item = &'a Deployment>,
    filter: impl Fn(&Deployment) -> bool,
) -> HashMap<String, Vec<Deployment>> {
    let mut groups: HashMap<String, Vec<Deployment>> = HashMap::new();
    for deployment in deployments {
        if filter(deployment) {
            groups
                .entry(deployment.node.connector.clone())
                .or_default()
                .push(deployment.clone());
        }
    }
    groups
}

/// Enumerates nodes across all connectors, filtered by the user's access
/// tags. A connector that fails to answer is logged and skipped.
pub async fn list_nodes(state: &AppState, user_tags: &[String]) -> Vec<Node> {
    let mut nodes = Vec::new();
    for (name, connector) in state.registry.iter() {
        match with_deadline(connector_deadline(state), connector.list_nodes()).await {
            Ok(Ok(connector_nodes)) => {
                nodes.extend(
                    connector_nodes
                        .into_iter()
                        .filter(|node| node.visible_to(user_tags)),
                );
            }
            Ok(Err(e)) => {
                tracing::warn!("Connector {} failed to list nodes: {}", name, e);
            }
            Err(e) => {
                tracing::warn!("Connector {} timed out listing nodes: {}", name, e);
            }
        }
    }
    nodes
}

/// Distributes compiled environments for all prepared deployments.
///
/// Per-deployment failures are recorded on the deployment itself; the call
/// as a whole only fails on store errors.
pub async fn deploy_experiment(
    state: &AppState,
    experiment_id: &str,
    experiment: &mut Experiment,
) -> Result<(), InfraError> {
    let groups = group_by_connector(
        experiment.deployments.iter(),
        |d: &Deployment| d.prepared && d.error.is_none(),
    );

    for (connector_name, group) in groups {
        let results = match state.registry.get(&connector_name) {
            Some(connector) => {
                let _permit = state.registry.limit(&connector_name).acquire_owned().await.ok();
                with_deadline(connector_deadline(state), connector.deploy(experiment_id, &group))
                    .await
                    .unwrap_or_else(|timeout| crate::connectors::fail_all(&group, false, &timeout))
            }
            None => {
                tracing::warn!(
                    "Connector {} for experiment {} is not available",
                    connector_name,
                    experiment_id
                );
                crate::connectors::fail_all(&group, false, "connector is not available")
            }
        };

        for (node_name, outcome) in results {
            if let Err(reason) = outcome {
                tracing::warn!(
                    "Deployment to node {} of experiment {} failed: {}",
                    node_name,
                    experiment_id,
                    reason
                );
                if let Some(deployment) = experiment
                    .deployments
                    .iter_mut()
                    .find(|d| d.node.name == node_name && d.error.is_none())
                {
                    deployment.error = Some(format!("deployment failed: {}", reason));
                }
            }
        }
    }

    Ok(())
}

/// Starts executors for a READY experiment and transitions it to RUNNING.
///
/// Every deployment gets an executor row: prepared ones receive a freshly
/// generated executor id and a connector start call; failed ones get a row
/// that is already finished with their error, so the experiment's result
/// vector always covers all deployments.
pub async fn start_experiment(
    state: &AppState,
    record: &ExperimentRecord,
) -> Result<(), InfraError> {
    let experiment_id = record.experiment_id.as_str();
    let mut experiment = record.experiment.clone();

    // refuse before any executor row exists: a half-started experiment is
    // worse than a failed start
    for deployment in &experiment.deployments {
        if deployment.prepared
            && deployment.error.is_none()
            && state.registry.get(&deployment.node.connector).is_none()
        {
            return Err(InfraError::ConnectorUnavailable(
                deployment.node.connector.clone(),
            ));
        }
    }

    for deployment in &mut experiment.deployments {
        let executor_id = Uuid::new_v4().to_string();
        deployment.executor_id = Some(executor_id.clone());

        if deployment.prepared && deployment.error.is_none() {
            executor_repository::create(
                &state.pool,
                experiment_id,
                &executor_id,
                &deployment.node.name,
                &deployment.node.connector,
                &deployment.pipeline,
            )
            .await?;
        } else {
            let error = deployment
                .error
                .clone()
                .unwrap_or_else(|| "deployment was not prepared".to_string());
            executor_repository::create_finished(
                &state.pool,
                experiment_id,
                &executor_id,
                &deployment.node.name,
                &deployment.node.connector,
                &deployment.pipeline,
                &error,
            )
            .await?;
        }
    }

    let groups = group_by_connector(
        experiment.deployments.iter(),
        |d: &Deployment| d.prepared && d.error.is_none(),
    );

    for (connector_name, group) in groups {
        let results = match state.registry.get(&connector_name) {
            Some(connector) => {
                let _permit = state.registry.limit(&connector_name).acquire_owned().await.ok();
                with_deadline(
                    connector_deadline(state),
                    connector.start_executors(experiment_id, &group),
                )
                .await
                .unwrap_or_else(|timeout| crate::connectors::fail_all(&group, true, &timeout))
            }
            None => crate::connectors::fail_all(&group, true, "connector is not available"),
        };

        for (executor_id, outcome) in results {
            if let Err(reason) = outcome {
                tracing::warn!(
                    "Starting executor {} of experiment {} failed: {}",
                    executor_id,
                    experiment_id,
                    reason
                );
                executor_repository::mark_failed(
                    &state.pool,
                    &executor_id,
                    &format!("start failed: {}", reason),
                )
                .await?;
                if let Some(deployment) = experiment
                    .deployments
                    .iter_mut()
                    .find(|d| d.executor_id.as_deref() == Some(executor_id.as_str()))
                {
                    deployment.error = Some(format!("start failed: {}", reason));
                }
            }
        }
    }

    experiment_repository::set_data(&state.pool, experiment_id, &experiment).await?;
    experiment_repository::set_start_time(&state.pool, experiment_id).await?;
    experiment_repository::transition_status(
        &state.pool,
        experiment_id,
        ExperimentStatus::Ready,
        ExperimentStatus::Running,
    )
    .await?;

    Ok(())
}

/// Asks connectors to stop every started executor of an experiment.
///
/// Cooperative: executors confirmed stopped are marked failed with a stop
/// marker; the rest run into the processor's liveness deadline.
pub async fn stop_experiment(state: &AppState, record: &ExperimentRecord) -> Result<(), InfraError> {
    let executors =
        executor_repository::list_for_experiment(&state.pool, &record.experiment_id).await?;

    let mut by_connector: HashMap<String, Vec<StopExecutorRequest>> = HashMap::new();
    for executor in executors.into_iter().filter(|e| !e.finished) {
        by_connector
            .entry(executor.connector.clone())
            .or_default()
            .push(StopExecutorRequest {
                executor_id: executor.executor_id,
                node_name: executor.node_name,
            });
    }

    for (connector_name, requests) in by_connector {
        let Some(connector) = state.registry.get(&connector_name) else {
            tracing::warn!(
                "Connector {} not available while stopping experiment {}",
                connector_name,
                record.experiment_id
            );
            continue;
        };

        let results =
            match with_deadline(connector_deadline(state), connector.stop_executors(&requests))
                .await
            {
                Ok(results) => results,
                Err(timeout) => {
                    tracing::warn!(
                        "Connector {} timed out stopping executors: {}",
                        connector_name,
                        timeout
                    );
                    continue;
                }
            };

        for (executor_id, outcome) in results {
            match outcome {
                Ok(()) => {
                    executor_repository::mark_failed(
                        &state.pool,
                        &executor_id,
                        "executor was stopped",
                    )
                    .await?;
                }
                Err(reason) => {
                    tracing::warn!("Stopping executor {} failed: {}", executor_id, reason);
                }
            }
        }
    }

    // catch-all for fleet-side state beyond individual executors
    let participating = group_by_connector(record.experiment.deployments.iter(), |_| true);
    for connector_name in participating.keys() {
        let Some(connector) = state.registry.get(connector_name) else {
            continue;
        };
        match with_deadline(
            connector_deadline(state),
            connector.stop_experiment(&record.experiment_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                "Stopping experiment {} on connector {} failed: {}",
                record.experiment_id,
                connector_name,
                e
            ),
            Err(e) => tracing::warn!(
                "Stopping experiment {} on connector {} timed out: {}",
                record.experiment_id,
                connector_name,
                e
            ),
        }
    }

    Ok(())
}

/// Invokes connector cleanup for a terminal experiment. Failures are logged
/// and never block the terminal transition.
pub async fn cleanup_experiment(state: &AppState, record: &ExperimentRecord) {
    let groups = group_by_connector(record.experiment.deployments.iter(), |_| true);

    for (connector_name, group) in groups {
        let Some(connector) = state.registry.get(&connector_name) else {
            tracing::warn!(
                "Connector {} not available for cleanup of experiment {}",
                connector_name,
                record.experiment_id
            );
            continue;
        };

        match with_deadline(
            connector_deadline(state),
            connector.cleanup(&record.experiment_id, &group),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                "Cleanup of experiment {} on connector {} failed: {}",
                record.experiment_id,
                connector_name,
                e
            ),
            Err(e) => tracing::warn!(
                "Cleanup of experiment {} on connector {} timed out: {}",
                record.experiment_id,
                connector_name,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netunicorn_core::domain::environment::EnvironmentDefinition;
    use netunicorn_core::domain::pipeline::Pipeline;
    use netunicorn_core::domain::task::TaskSpec;

    fn deployment(node: &str, connector: &str, prepared: bool) -> Deployment {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell()).then(TaskSpec::new("noop"));
        let mut deployment = Deployment::new(Node::new(node, connector), &pipeline);
        deployment.prepared = prepared;
        deployment
    }

    #[test]
    fn grouping_routes_each_connector_its_own_deployments() {
        let deployments = vec![
            deployment("a", "lab", true),
            deployment("b", "cloud", true),
            deployment("c", "lab", true),
            deployment("d", "lab", false),
        ];

        let groups = group_by_connector(deployments.iter(), |d| d.prepared);
        assert_eq!(groups.get("lab").map(Vec::len), Some(2));
        assert_eq!(groups.get("cloud").map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn deadline_converts_slow_calls_into_errors() {
        let result = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            42
        })
        .await;
        assert!(result.is_err());

        let result = with_deadline(Duration::from_secs(5), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
