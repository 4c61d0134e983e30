//! Connector Protocol & Registry
//!
//! Connectors translate director intents into actions of the underlying
//! fleet-management system. The registry is built once at boot from the
//! configuration; afterwards routing is a name lookup. Connectors report
//! only whether their own action succeeded; executor lifecycle is observed
//! by the gateway and the processor.

pub mod local;
pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use netunicorn_core::domain::deployment::Deployment;
use netunicorn_core::domain::node::Node;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::ConnectorConfig;

/// Error of a whole connector call (as opposed to per-item failures).
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connector unreachable: {0}")]
    Unreachable(String),
    #[error("connector failed: {0}")]
    Failed(String),
}

/// Request to stop one executor on its node.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StopExecutorRequest {
    pub executor_id: String,
    pub node_name: String,
}

/// Per-item outcome vector; the key is a node name for deploy operations
/// and an executor id for start/stop operations.
pub type PerItemResults = Vec<(String, Result<(), String>)>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn health(&self) -> Result<(), ConnectorError>;

    /// Enumerates the nodes this connector manages.
    async fn list_nodes(&self) -> Result<Vec<Node>, ConnectorError>;

    /// Distributes compiled environments to the nodes. Keyed by node name.
    async fn deploy(&self, experiment_id: &str, deployments: &[Deployment]) -> PerItemResults;

    /// Instantiates executors for started deployments. Keyed by executor id;
    /// every deployment passed here carries one.
    async fn start_executors(
        &self,
        experiment_id: &str,
        deployments: &[Deployment],
    ) -> PerItemResults;

    /// Stops individual executors. Keyed by executor id.
    async fn stop_executors(&self, requests: &[StopExecutorRequest]) -> PerItemResults;

    /// Stops everything belonging to an experiment.
    async fn stop_experiment(&self, experiment_id: &str) -> Result<(), ConnectorError>;

    /// Removes artifacts of an experiment. Must be idempotent.
    async fn cleanup(
        &self,
        experiment_id: &str,
        deployments: &[Deployment],
    ) -> Result<(), ConnectorError>;
}

/// Marks every deployment of a batch failed with the same reason.
///
/// Used when the connector call itself failed and no per-item verdicts
/// exist.
pub fn fail_all(deployments: &[Deployment], keyed_by_executor: bool, reason: &str) -> PerItemResults {
    deployments
        .iter()
        .map(|d| {
            let key = if keyed_by_executor {
                d.executor_id.clone().unwrap_or_default()
            } else {
                d.node.name.clone()
            };
            (key, Err(reason.to_string()))
        })
        .collect()
}

/// Static connector registry, constructed once at boot.
///
/// Each connector carries a semaphore capping its concurrent calls; a slow
/// fleet manager backs up its own queue, not the whole director.
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
    limits: HashMap<String, Arc<Semaphore>>,
    concurrency: usize,
}

impl ConnectorRegistry {
    /// Builds one long-lived connector instance per enabled config entry.
    ///
    /// A misconfigured connector is a fatal initialization error: a director
    /// that silently dropped a connector would strand its deployments.
    pub fn from_config(
        configs: &HashMap<String, ConnectorConfig>,
        gateway_endpoint: &str,
        concurrency: usize,
    ) -> anyhow::Result<Self> {
        let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();

        for (name, config) in configs {
            if !config.enabled() {
                tracing::info!("Skipping connector {} as disabled", name);
                continue;
            }

            let connector: Arc<dyn Connector> = match config {
                ConnectorConfig::Local {
                    executor_binary,
                    working_directory,
                    nodes,
                    ..
                } => Arc::new(local::LocalProcessConnector::new(
                    name.clone(),
                    executor_binary.clone(),
                    working_directory.clone(),
                    nodes.clone(),
                    gateway_endpoint.to_string(),
                )),
                ConnectorConfig::Rest { url, .. } => {
                    Arc::new(rest::RestConnector::new(name.clone(), url.clone())?)
                }
            };

            tracing::info!("Connector {} initialized", name);
            connectors.insert(name.clone(), connector);
        }

        if connectors.is_empty() {
            tracing::warn!("No connectors configured");
        }

        let limits = connectors
            .keys()
            .map(|name| (name.clone(), Arc::new(Semaphore::new(concurrency))))
            .collect();

        Ok(Self {
            connectors,
            limits,
            concurrency,
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    /// Concurrency cap for calls to the named connector.
    pub fn limit(&self, name: &str) -> Arc<Semaphore> {
        self.limits
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(self.concurrency)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn Connector>)> {
        self.connectors.iter()
    }
}
