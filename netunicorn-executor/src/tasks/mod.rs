//! Task registry
//!
//! Pipelines carry [`TaskSpec`]s: a registry key plus an initialization
//! payload. The registry resolves keys to task implementations at run time;
//! an unknown key makes that task fail, never the executor.

pub mod builtin;

use std::collections::HashMap;

use async_trait::async_trait;
use netunicorn_client::GatewayClient;
use netunicorn_core::domain::task::{TaskOutcome, TaskResults, TaskSpec};

use crate::logbuf::LogBuffer;

/// Everything a task may use while running.
///
/// `previous` is an immutable snapshot of all results settled before this
/// task's stage began; tasks within one stage cannot see each other.
pub struct TaskContext {
    pub experiment_id: String,
    pub previous: TaskResults,
    pub gateway: GatewayClient,
    pub log: LogBuffer,
}

/// A resolved, runnable task instance.
#[async_trait]
pub trait RunnableTask: Send + Sync {
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome;
}

/// Lifts a plain value-or-description result into the tagged outcome.
pub fn into_outcome(result: Result<serde_json::Value, String>) -> TaskOutcome {
    match result {
        Ok(value) => TaskOutcome::Success(value),
        Err(description) => TaskOutcome::Failure(description),
    }
}

type TaskFactory =
    Box<dyn Fn(&TaskSpec) -> Result<Box<dyn RunnableTask>, String> + Send + Sync>;

/// Registry mapping task kinds to implementation factories.
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with all built-in tasks available.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: impl Fn(&TaskSpec) -> Result<Box<dyn RunnableTask>, String> + Send + Sync + 'static,
    ) {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Resolves a spec into a runnable task.
    pub fn build(&self, spec: &TaskSpec) -> Result<Box<dyn RunnableTask>, String> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| format!("unknown task kind: {}", spec.kind))?;
        factory(spec)
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_an_error() {
        let registry = TaskRegistry::with_builtins();
        let spec = TaskSpec::new("definitely_not_registered");
        assert!(registry.build(&spec).is_err());
    }

    #[test]
    fn builtins_are_registered() {
        let registry = TaskRegistry::with_builtins();
        let kinds = registry.kinds();
        for kind in [
            "run_command",
            "sleep",
            "echo",
            "set_flag",
            "increment_flag",
            "decrement_flag",
            "wait_for_flag",
        ] {
            assert!(kinds.contains(&kind), "builtin {} missing", kind);
        }
    }

    #[test]
    fn untagged_values_are_lifted_into_success() {
        let outcome = into_outcome(Ok(serde_json::json!(42)));
        assert_eq!(outcome, TaskOutcome::Success(serde_json::json!(42)));

        let outcome = into_outcome(Err("boom".to_string()));
        assert_eq!(outcome, TaskOutcome::Failure("boom".to_string()));
    }
}
