//! Executor state machine

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node-side executor.
///
/// Reported to the gateway piggybacked on heartbeats and with the final
/// result submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    /// Looking for a pipeline, locally or from the gateway.
    Loading,
    /// Interpreting the pipeline stages.
    Executing,
    /// Posting the final result.
    Reporting,
    /// Clean exit.
    Terminated,
    /// Transport or load failure before or during execution.
    Failed,
}

impl ExecutorState {
    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutorState::Terminated | ExecutorState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorState::Loading => "LOADING",
            ExecutorState::Executing => "EXECUTING",
            ExecutorState::Reporting => "REPORTING",
            ExecutorState::Terminated => "TERMINATED",
            ExecutorState::Failed => "FAILED",
        }
    }

    pub fn from_str_or_failed(s: &str) -> Self {
        match s {
            "LOADING" => ExecutorState::Loading,
            "EXECUTING" => ExecutorState::Executing,
            "REPORTING" => ExecutorState::Reporting,
            "TERMINATED" => ExecutorState::Terminated,
            _ => ExecutorState::Failed,
        }
    }
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
