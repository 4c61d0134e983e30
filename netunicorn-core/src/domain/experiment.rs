//! Experiment domain types

use serde::{Deserialize, Serialize};

use super::deployment::Deployment;
use super::node::Node;
use super::pipeline::Pipeline;

/// Lifecycle status of an experiment.
///
/// Progression is a prefix of `Created → Preparing → Ready → Running →
/// Finished`; `Finished` is absorbing. `Unknown` marks experiments wedged by
/// operator-level failures and is never entered by the normal lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    Unknown,
    Created,
    Preparing,
    Ready,
    Running,
    Finished,
}

impl ExperimentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Finished | ExperimentStatus::Unknown)
    }

    /// Whether moving to `next` follows the lifecycle order.
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Created, Preparing)
                | (Preparing, Ready)
                | (Preparing, Finished)
                | (Ready, Running)
                | (Running, Finished)
                // cancellation is allowed from any non-terminal state
                | (Created, Finished)
                | (Ready, Finished)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Unknown => "UNKNOWN",
            ExperimentStatus::Created => "CREATED",
            ExperimentStatus::Preparing => "PREPARING",
            ExperimentStatus::Ready => "READY",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Finished => "FINISHED",
        }
    }

    pub fn from_str_or_unknown(s: &str) -> Self {
        match s {
            "CREATED" => ExperimentStatus::Created,
            "PREPARING" => ExperimentStatus::Preparing,
            "READY" => ExperimentStatus::Ready,
            "RUNNING" => ExperimentStatus::Running,
            "FINISHED" => ExperimentStatus::Finished,
            _ => ExperimentStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-named bundle of deployments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Experiment {
    pub deployments: Vec<Deployment>,
}

impl Experiment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a deployment binding `pipeline` to `node`.
    pub fn append(mut self, node: Node, pipeline: &Pipeline) -> Self {
        self.deployments.push(Deployment::new(node, pipeline));
        self
    }

    /// Maps one pipeline onto a set of nodes.
    pub fn map(mut self, pipeline: &Pipeline, nodes: impl IntoIterator<Item = Node>) -> Self {
        for node in nodes {
            self.deployments.push(Deployment::new(node, pipeline));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}

/// Result (or in-flight information) of one deployment's execution.
///
/// The result blob is whatever the executor posted, surfaced verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentExecutionResult {
    pub node_name: String,
    pub executor_id: Option<String>,
    #[serde(with = "crate::serde_bytes::option")]
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
}

/// Full status answer for one experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentInfo {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub deployments: Vec<Deployment>,
    pub execution_results: Option<Vec<DeploymentExecutionResult>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::environment::EnvironmentDefinition;
    use crate::domain::task::TaskSpec;

    #[test]
    fn lifecycle_is_monotonic() {
        use ExperimentStatus::*;
        assert!(Created.can_transition_to(Preparing));
        assert!(Preparing.can_transition_to(Ready));
        assert!(Running.can_transition_to(Finished));
        assert!(!Finished.can_transition_to(Running));
        assert!(!Ready.can_transition_to(Preparing));
        assert!(!Running.can_transition_to(Ready));
    }

    #[test]
    fn all_failed_compilations_may_finish_from_preparing() {
        assert!(ExperimentStatus::Preparing.can_transition_to(ExperimentStatus::Finished));
    }

    #[test]
    fn map_creates_one_deployment_per_node() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell()).then(TaskSpec::new("noop"));
        let nodes = (0..5).map(|i| Node::new(format!("node-{i}"), "local"));
        let experiment = Experiment::new().map(&pipeline, nodes);
        assert_eq!(experiment.deployments.len(), 5);
    }
}
