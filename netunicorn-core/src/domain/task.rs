//! Task domain types
//!
//! A task is the smallest unit of work in a pipeline. On the wire a task is a
//! [`TaskSpec`]: a registry key plus an initialization payload. The executor
//! resolves the key against its task registry and runs the implementation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::node::Node;

/// Serializable description of a single task instance.
///
/// Two instances of the same task kind carry their prerequisites
/// independently; prerequisite commands are never deduplicated across
/// instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique name of this task instance within the pipeline.
    pub name: String,
    /// Registry key resolved by the executor to a task implementation.
    pub kind: String,
    /// Caller-provided initialization payload passed to the implementation.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Shell commands required in the environment before this task can run.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            name: Uuid::new_v4().to_string(),
            kind: kind.into(),
            params: serde_json::Value::Null,
            prerequisites: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Adds an environment prerequisite command for this instance.
    pub fn add_prerequisite(mut self, command: impl Into<String>) -> Self {
        self.prerequisites.push(command.into());
        self
    }
}

/// Outcome of a single task execution.
///
/// The only failure channel of the platform: a task that raises is captured
/// as `Failure(description)`, a task returning an untagged value is lifted
/// into `Success` at the executor boundary. Task failures are reported
/// verbatim and never escalate to experiment failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value")]
pub enum TaskOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }
}

/// Accumulated results of a pipeline run, keyed by task name.
///
/// Each name maps to the history of that name's results across the run, in
/// execution order.
pub type TaskResults = HashMap<String, Vec<TaskOutcome>>;

/// Error returned when a dispatcher cannot pick a task for a node.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("node {node} is missing required property {property}")]
    MissingProperty { node: String, property: String },
    #[error("no task implementation for node {node}: {reason}")]
    Unsupported { node: String, reason: String },
}

/// Client-side selection of a node-specific task variant.
///
/// Dispatchers are evaluated strictly before submission; only the chosen
/// [`TaskSpec`] is carried over the wire.
pub trait TaskDispatcher {
    fn name(&self) -> &str;
    fn dispatch(&self, node: &Node) -> Result<TaskSpec, DispatchError>;
}

/// Dispatches between task variants on the node's `os_family` property.
///
/// A node without the property is rejected at dispatch time rather than
/// deferred to the executor.
pub struct OsFamilyDispatcher {
    name: String,
    variants: HashMap<String, TaskSpec>,
}

impl OsFamilyDispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variants: HashMap::new(),
        }
    }

    pub fn variant(mut self, os_family: impl Into<String>, spec: TaskSpec) -> Self {
        self.variants.insert(os_family.into(), spec);
        self
    }
}

impl TaskDispatcher for OsFamilyDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self, node: &Node) -> Result<TaskSpec, DispatchError> {
        let os_family = node
            .property_str("os_family")
            .ok_or_else(|| DispatchError::MissingProperty {
                node: node.name.clone(),
                property: "os_family".to_string(),
            })?;

        self.variants
            .get(os_family)
            .cloned()
            .map(|spec| spec.with_name(self.name.clone()))
            .ok_or_else(|| DispatchError::Unsupported {
                node: node.name.clone(),
                reason: format!("no variant for os_family {}", os_family),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::architecture::Architecture;

    fn node_with_properties(properties: serde_json::Value) -> Node {
        Node {
            name: "node-1".to_string(),
            connector: "local".to_string(),
            architecture: Architecture::LinuxAmd64,
            properties: serde_json::from_value(properties).unwrap(),
        }
    }

    #[test]
    fn prerequisites_are_per_instance() {
        let first = TaskSpec::new("run_command").add_prerequisite("apt install iperf3");
        let second = TaskSpec::new("run_command").add_prerequisite("apt install iperf3");
        assert_eq!(first.prerequisites, second.prerequisites);
        assert_ne!(first.name, second.name);
    }

    #[test]
    fn dispatch_fails_on_missing_os_family() {
        let dispatcher =
            OsFamilyDispatcher::new("capture").variant("linux", TaskSpec::new("capture_linux"));
        let node = node_with_properties(serde_json::json!({}));

        let err = dispatcher.dispatch(&node).unwrap_err();
        assert!(matches!(err, DispatchError::MissingProperty { .. }));
    }

    #[test]
    fn dispatch_selects_variant_and_keeps_dispatcher_name() {
        let dispatcher =
            OsFamilyDispatcher::new("capture").variant("linux", TaskSpec::new("capture_linux"));
        let node = node_with_properties(serde_json::json!({"os_family": "linux"}));

        let spec = dispatcher.dispatch(&node).unwrap();
        assert_eq!(spec.kind, "capture_linux");
        assert_eq!(spec.name, "capture");
    }
}
