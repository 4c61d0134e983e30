//! Deployment domain types

use serde::{Deserialize, Serialize};

use super::environment::EnvironmentDefinition;
use super::node::Node;
use super::pipeline::Pipeline;

/// Binding of one pipeline to one node.
///
/// Created when an experiment is expanded at submission. The pipeline is
/// stored in its serialized form; the environment definition is lifted out of
/// it (with task prerequisites folded in) so the compiler never has to decode
/// the pipeline itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub node: Node,
    /// Serialized pipeline, opaque to the director.
    #[serde(with = "crate::serde_bytes")]
    pub pipeline: Vec<u8>,
    pub environment_definition: EnvironmentDefinition,
    /// True once the deployment's compilation recorded success.
    pub prepared: bool,
    /// Server-generated executor id, filled at experiment start.
    pub executor_id: Option<String>,
    /// Terminal error of this deployment, if any.
    pub error: Option<String>,
    pub keep_alive_timeout_minutes: Option<u32>,
    /// Whether artifacts are removed after execution.
    pub cleanup: bool,
}

impl Deployment {
    /// Binds `pipeline` to `node`, folding every task instance's
    /// prerequisite commands into the environment definition.
    pub fn new(node: Node, pipeline: &Pipeline) -> Self {
        let mut environment_definition = pipeline.environment_definition.clone();
        for command in pipeline.prerequisites() {
            environment_definition.push_command(command);
        }

        Self {
            node,
            pipeline: pipeline.serialize(),
            environment_definition,
            prepared: false,
            executor_id: None,
            error: None,
            keep_alive_timeout_minutes: pipeline.keep_alive_timeout_minutes,
            cleanup: true,
        }
    }

    /// Fingerprint identifying the compilation this deployment shares.
    pub fn compilation_id(&self) -> String {
        self.environment_definition
            .fingerprint(&self.pipeline, self.node.architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::architecture::Architecture;
    use crate::domain::task::TaskSpec;

    #[test]
    fn prerequisites_fold_into_environment() {
        let pipeline = Pipeline::new(EnvironmentDefinition::docker())
            .then(TaskSpec::new("capture").add_prerequisite("apt install tcpdump"));
        let deployment = Deployment::new(Node::new("node-1", "local"), &pipeline);

        assert_eq!(
            deployment.environment_definition.commands(),
            &["apt install tcpdump".to_string()]
        );
    }

    #[test]
    fn same_pipeline_and_architecture_share_a_compilation() {
        let pipeline = Pipeline::new(EnvironmentDefinition::docker()).then(TaskSpec::new("noop"));
        let amd = Node::new("a", "local").with_architecture(Architecture::LinuxAmd64);
        let arm = Node::new("b", "local").with_architecture(Architecture::LinuxArm64);

        let first = Deployment::new(amd.clone(), &pipeline);
        let second = Deployment::new(amd, &pipeline);
        let third = Deployment::new(arm, &pipeline);

        assert_eq!(first.compilation_id(), second.compilation_id());
        assert_ne!(first.compilation_id(), third.compilation_id());
    }
}
