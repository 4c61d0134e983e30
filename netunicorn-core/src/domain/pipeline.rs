//! Pipeline domain types
//!
//! A pipeline is an ordered sequence of stages; each stage is an unordered
//! bag of tasks run concurrently by the executor. Stages execute strictly in
//! order and all tasks of a stage must settle before the next stage begins.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::environment::EnvironmentDefinition;
use super::task::TaskSpec;

/// An unordered bag of tasks executed concurrently within one stage.
pub type Stage = Vec<TaskSpec>;

/// Pipeline definition
///
/// Serialized by the client and carried as an opaque blob through the store
/// and the compiler; only the executor decodes it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Stable identifier of this pipeline.
    pub name: String,
    pub stages: Vec<Stage>,
    pub environment_definition: EnvironmentDefinition,
    /// Whether the executor posts its final result to the gateway.
    pub report_results: bool,
    /// Whether stages after the first failing stage are skipped.
    pub early_stopping: bool,
    /// Outer wall-clock envelope for the executor, in minutes.
    pub keep_alive_timeout_minutes: Option<u32>,
}

/// Failure to decode pipeline bytes.
#[derive(Debug, Error)]
#[error("malformed pipeline payload: {0}")]
pub struct PipelineDecodeError(#[from] serde_json::Error);

impl Pipeline {
    pub fn new(environment_definition: EnvironmentDefinition) -> Self {
        Self {
            name: Uuid::new_v4().to_string(),
            stages: Vec::new(),
            environment_definition,
            report_results: true,
            early_stopping: true,
            keep_alive_timeout_minutes: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn report_results(mut self, report: bool) -> Self {
        self.report_results = report;
        self
    }

    pub fn keep_alive_timeout_minutes(mut self, minutes: u32) -> Self {
        self.keep_alive_timeout_minutes = Some(minutes);
        self
    }

    /// Appends a single-task stage.
    pub fn then(mut self, task: TaskSpec) -> Self {
        self.stages.push(vec![task]);
        self
    }

    /// Appends a stage of tasks to run concurrently.
    pub fn then_stage(mut self, tasks: impl IntoIterator<Item = TaskSpec>) -> Self {
        self.stages.push(tasks.into_iter().collect());
        self
    }

    /// All prerequisite commands of all task instances, in pipeline order.
    ///
    /// Instances contribute independently; commands are not deduplicated.
    pub fn prerequisites(&self) -> Vec<String> {
        self.stages
            .iter()
            .flatten()
            .flat_map(|task| task.prerequisites.iter().cloned())
            .collect()
    }

    /// The single wire encoding used between client, compiler, and executor.
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("pipeline serializes")
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, PipelineDecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_preserve_insertion_order() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell())
            .then(TaskSpec::new("start_capture").with_name("capture"))
            .then_stage([
                TaskSpec::new("speed_test").with_name("st-1"),
                TaskSpec::new("speed_test").with_name("st-2"),
            ])
            .then(TaskSpec::new("stop_capture").with_name("stop"));

        assert_eq!(pipeline.stages.len(), 3);
        assert_eq!(pipeline.stages[1].len(), 2);
        assert_eq!(pipeline.stages[2][0].name, "stop");
    }

    #[test]
    fn prerequisites_accumulate_without_deduplication() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell())
            .then(TaskSpec::new("speed_test").add_prerequisite("pip install speedtest-cli"))
            .then(TaskSpec::new("speed_test").add_prerequisite("pip install speedtest-cli"));

        assert_eq!(pipeline.prerequisites().len(), 2);
    }

    #[test]
    fn decoded_pipeline_matches_encoded_payload() {
        let pipeline = Pipeline::new(EnvironmentDefinition::docker())
            .with_name("speed-run")
            .keep_alive_timeout_minutes(15)
            .then(TaskSpec::new("speed_test"));

        let bytes = pipeline.serialize();
        let decoded = Pipeline::deserialize(&bytes).unwrap();
        assert_eq!(decoded.name, "speed-run");
        assert_eq!(decoded.keep_alive_timeout_minutes, Some(15));
        assert_eq!(decoded.stages.len(), 1);
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(Pipeline::deserialize(b"not a pipeline").is_err());
    }
}
