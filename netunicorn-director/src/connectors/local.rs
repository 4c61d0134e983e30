//! Local process connector
//!
//! Runs executors as child processes on the director host. Each configured
//! node name becomes one single-executor "node". Intended for development
//! fleets and end-to-end tests; deployment is a no-op because the host
//! already has the executor binary.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use netunicorn_core::domain::architecture::Architecture;
use netunicorn_core::domain::deployment::Deployment;
use netunicorn_core::domain::node::Node;
use tokio::process::{Child, Command};

use super::{Connector, ConnectorError, PerItemResults, StopExecutorRequest};

pub struct LocalProcessConnector {
    name: String,
    executor_binary: String,
    working_directory: String,
    nodes: Vec<String>,
    gateway_endpoint: String,
    running: Mutex<HashMap<String, Child>>,
}

impl LocalProcessConnector {
    pub fn new(
        name: String,
        executor_binary: String,
        working_directory: String,
        nodes: Vec<String>,
        gateway_endpoint: String,
    ) -> Self {
        Self {
            name,
            executor_binary,
            working_directory,
            nodes,
            gateway_endpoint,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn host_architecture() -> Architecture {
        match std::env::consts::ARCH {
            "x86_64" => Architecture::LinuxAmd64,
            "aarch64" => Architecture::LinuxArm64,
            _ => Architecture::Unknown,
        }
    }

    fn spawn_executor(&self, experiment_id: &str, executor_id: &str) -> Result<Child, String> {
        Command::new(&self.executor_binary)
            .current_dir(&self.working_directory)
            .env("NETUNICORN_GATEWAY_ENDPOINT", &self.gateway_endpoint)
            .env("NETUNICORN_EXPERIMENT_ID", experiment_id)
            .env("NETUNICORN_EXECUTOR_ID", executor_id)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to spawn executor process: {}", e))
    }
}

#[async_trait]
impl Connector for LocalProcessConnector {
    async fn health(&self) -> Result<(), ConnectorError> {
        if std::path::Path::new(&self.executor_binary).exists() {
            Ok(())
        } else {
            Err(ConnectorError::Failed(format!(
                "executor binary {} not found",
                self.executor_binary
            )))
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ConnectorError> {
        let architecture = Self::host_architecture();
        Ok(self
            .nodes
            .iter()
            .map(|name| {
                Node::new(name.clone(), self.name.clone())
                    .with_architecture(architecture)
                    .with_property("os_family", serde_json::json!("linux"))
            })
            .collect())
    }

    async fn deploy(&self, _experiment_id: &str, deployments: &[Deployment]) -> PerItemResults {
        // nothing to distribute: the host runs the executor binary directly
        deployments
            .iter()
            .map(|d| (d.node.name.clone(), Ok(())))
            .collect()
    }

    async fn start_executors(
        &self,
        experiment_id: &str,
        deployments: &[Deployment],
    ) -> PerItemResults {
        let mut results = Vec::with_capacity(deployments.len());
        for deployment in deployments {
            let Some(executor_id) = deployment.executor_id.clone() else {
                results.push((String::new(), Err("deployment has no executor id".into())));
                continue;
            };

            match self.spawn_executor(experiment_id, &executor_id) {
                Ok(child) => {
                    self.running.lock().unwrap().insert(executor_id.clone(), child);
                    results.push((executor_id, Ok(())));
                }
                Err(e) => results.push((executor_id, Err(e))),
            }
        }
        results
    }

    async fn stop_executors(&self, requests: &[StopExecutorRequest]) -> PerItemResults {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let child = self.running.lock().unwrap().remove(&request.executor_id);
            match child {
                Some(mut child) => {
                    let outcome = child
                        .start_kill()
                        .map_err(|e| format!("failed to stop executor: {}", e));
                    results.push((request.executor_id.clone(), outcome));
                }
                None => results.push((request.executor_id.clone(), Ok(()))),
            }
        }
        results
    }

    async fn stop_experiment(&self, _experiment_id: &str) -> Result<(), ConnectorError> {
        let executor_ids: Vec<String> = self.running.lock().unwrap().keys().cloned().collect();
        let requests: Vec<StopExecutorRequest> = executor_ids
            .into_iter()
            .map(|executor_id| StopExecutorRequest {
                executor_id,
                node_name: String::new(),
            })
            .collect();
        self.stop_executors(&requests).await;
        Ok(())
    }

    async fn cleanup(
        &self,
        _experiment_id: &str,
        deployments: &[Deployment],
    ) -> Result<(), ConnectorError> {
        // reap any children that already exited; kill the rest
        let mut running = self.running.lock().unwrap();
        for deployment in deployments {
            if let Some(executor_id) = &deployment.executor_id {
                if let Some(mut child) = running.remove(executor_id) {
                    let _ = child.start_kill();
                }
            }
        }
        Ok(())
    }
}
