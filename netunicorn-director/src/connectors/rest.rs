//! REST connector
//!
//! Forwards every operation as JSON over HTTP to a remote fleet-manager
//! service that implements the connector protocol. Per-item verdicts come
//! back as a map of key to optional error.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use netunicorn_core::domain::deployment::Deployment;
use netunicorn_core::domain::node::Node;
use serde::Serialize;

use super::{Connector, ConnectorError, PerItemResults, StopExecutorRequest};

pub struct RestConnector {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct DeploymentBatch<'a> {
    experiment_id: &'a str,
    deployments: &'a [Deployment],
}

/// key → error text; a missing or null value means success.
type RemoteVerdicts = HashMap<String, Option<String>>;

impl RestConnector {
    pub fn new(name: String, base_url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_batch(
        &self,
        operation: &str,
        experiment_id: &str,
        deployments: &[Deployment],
        keyed_by_executor: bool,
    ) -> PerItemResults {
        let url = format!("{}/{}", self.base_url, operation);
        let batch = DeploymentBatch {
            experiment_id,
            deployments,
        };

        let response = match self.client.post(&url).json(&batch).send().await {
            Ok(response) => response,
            Err(e) => {
                return super::fail_all(
                    deployments,
                    keyed_by_executor,
                    &format!("connector unreachable: {}", e),
                );
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return super::fail_all(
                deployments,
                keyed_by_executor,
                &format!("connector returned {}: {}", status, body),
            );
        }

        let verdicts: RemoteVerdicts = match response.json().await {
            Ok(verdicts) => verdicts,
            Err(e) => {
                return super::fail_all(
                    deployments,
                    keyed_by_executor,
                    &format!("malformed connector response: {}", e),
                );
            }
        };

        deployments
            .iter()
            .map(|d| {
                let key = if keyed_by_executor {
                    d.executor_id.clone().unwrap_or_default()
                } else {
                    d.node.name.clone()
                };
                let outcome = match verdicts.get(&key) {
                    Some(Some(error)) => Err(error.clone()),
                    _ => Ok(()),
                };
                (key, outcome)
            })
            .collect()
    }
}

#[async_trait]
impl Connector for RestConnector {
    async fn health(&self) -> Result<(), ConnectorError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConnectorError::Failed(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ConnectorError> {
        let url = format!("{}/nodes", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Failed(format!(
                "node listing returned {}",
                response.status()
            )));
        }

        let mut nodes: Vec<Node> = response
            .json()
            .await
            .map_err(|e| ConnectorError::Failed(format!("malformed node list: {}", e)))?;

        // the fleet manager doesn't know our registry name for it
        for node in &mut nodes {
            node.connector = self.name.clone();
        }

        Ok(nodes)
    }

    async fn deploy(&self, experiment_id: &str, deployments: &[Deployment]) -> PerItemResults {
        self.post_batch("deploy", experiment_id, deployments, false)
            .await
    }

    async fn start_executors(
        &self,
        experiment_id: &str,
        deployments: &[Deployment],
    ) -> PerItemResults {
        self.post_batch("start", experiment_id, deployments, true)
            .await
    }

    async fn stop_executors(&self, requests: &[StopExecutorRequest]) -> PerItemResults {
        let url = format!("{}/stop_executors", self.base_url);
        let response = match self.client.post(&url).json(requests).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let reason = format!("connector returned {}", response.status());
                return requests
                    .iter()
                    .map(|r| (r.executor_id.clone(), Err(reason.clone())))
                    .collect();
            }
            Err(e) => {
                let reason = format!("connector unreachable: {}", e);
                return requests
                    .iter()
                    .map(|r| (r.executor_id.clone(), Err(reason.clone())))
                    .collect();
            }
        };

        let verdicts: RemoteVerdicts = response.json().await.unwrap_or_default();
        requests
            .iter()
            .map(|r| {
                let outcome = match verdicts.get(&r.executor_id) {
                    Some(Some(error)) => Err(error.clone()),
                    _ => Ok(()),
                };
                (r.executor_id.clone(), outcome)
            })
            .collect()
    }

    async fn stop_experiment(&self, experiment_id: &str) -> Result<(), ConnectorError> {
        let url = format!("{}/experiment/{}/stop", self.base_url, experiment_id);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConnectorError::Failed(format!(
                "stop returned {}",
                response.status()
            )))
        }
    }

    async fn cleanup(
        &self,
        experiment_id: &str,
        deployments: &[Deployment],
    ) -> Result<(), ConnectorError> {
        let url = format!("{}/cleanup", self.base_url);
        let batch = DeploymentBatch {
            experiment_id,
            deployments,
        };
        let response = self
            .client
            .post(&url)
            .json(&batch)
            .send()
            .await
            .map_err(|e| ConnectorError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConnectorError::Failed(format!(
                "cleanup returned {}",
                response.status()
            )))
        }
    }
}
