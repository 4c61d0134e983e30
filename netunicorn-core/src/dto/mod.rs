//! DTOs for inter-service communication

use serde::{Deserialize, Serialize};

use crate::domain::executor::ExecutorState;
use crate::domain::experiment::Experiment;
use crate::domain::task::TaskResults;

/// Request to submit a new experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExperimentRequest {
    /// User-chosen experiment name, unique per user.
    pub name: String,
    pub experiment: Experiment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitExperimentResponse {
    pub experiment_id: String,
}

/// Heartbeat from an executor, with its current state piggybacked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub state: Option<ExecutorState>,
}

/// Final result submission from an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorResultRequest {
    pub state: ExecutorState,
    /// Serialized [`ExecutionReport`], opaque to the gateway.
    #[serde(with = "crate::serde_bytes")]
    pub result: Vec<u8>,
}

/// Composite result of one pipeline run.
///
/// Decoded only by the submitting user; the platform moves it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Whether every executed task succeeded.
    pub success: bool,
    /// Per-task-name history of outcomes across the run.
    pub results: TaskResults,
    /// Captured output lines from the run.
    pub log: Vec<String>,
}

impl ExecutionReport {
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("execution report serializes")
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
