//! Pipeline interpreter
//!
//! Stages run strictly in order; tasks within a stage run concurrently on a
//! bounded worker pool and must all settle before the next stage starts.
//! Each task sees an immutable snapshot of every result settled in earlier
//! stages. A failing stage ends the run (unless the pipeline disables early
//! stopping); the per-task history accumulated so far is the result either
//! way.

use std::sync::Arc;

use netunicorn_client::GatewayClient;
use netunicorn_core::domain::pipeline::Pipeline;
use netunicorn_core::domain::task::{TaskOutcome, TaskResults};
use tokio::sync::Semaphore;

use crate::logbuf::LogBuffer;
use crate::tasks::{TaskContext, TaskRegistry};

pub struct PipelineInterpreter {
    registry: Arc<TaskRegistry>,
    gateway: GatewayClient,
    experiment_id: String,
    executor_id: String,
    pub log: LogBuffer,
    max_parallel_tasks: usize,
}

impl PipelineInterpreter {
    pub fn new(
        registry: Arc<TaskRegistry>,
        gateway: GatewayClient,
        experiment_id: String,
        executor_id: String,
        max_parallel_tasks: usize,
    ) -> Self {
        Self {
            registry,
            gateway,
            experiment_id,
            executor_id,
            log: LogBuffer::new(),
            max_parallel_tasks,
        }
    }

    /// Runs the pipeline to completion or to its first failing stage.
    ///
    /// Returns whether every executed task succeeded, plus the per-name
    /// result history.
    pub async fn execute(&self, pipeline: &Pipeline) -> (bool, TaskResults) {
        let mut results = TaskResults::new();
        let mut success = true;
        let permits = Arc::new(Semaphore::new(self.max_parallel_tasks));

        self.log.push(format!(
            "executor {} running pipeline {} ({} stages)",
            self.executor_id,
            pipeline.name,
            pipeline.stages.len()
        ));

        for (stage_index, stage) in pipeline.stages.iter().enumerate() {
            self.log
                .push(format!("stage {}: {} task(s)", stage_index, stage.len()));

            let snapshot = results.clone();
            let mut handles = Vec::with_capacity(stage.len());

            for spec in stage {
                let permits = Arc::clone(&permits);
                let registry = Arc::clone(&self.registry);
                let spec = spec.clone();
                let context = TaskContext {
                    experiment_id: self.experiment_id.clone(),
                    previous: snapshot.clone(),
                    gateway: self.gateway.clone(),
                    log: self.log.clone(),
                };

                let name = spec.name.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return TaskOutcome::Failure("worker pool closed".to_string()),
                    };
                    match registry.build(&spec) {
                        Ok(task) => task.run(&context).await,
                        Err(reason) => TaskOutcome::Failure(reason),
                    }
                });
                handles.push((name, handle));
            }

            let mut stage_passed = true;
            for (name, handle) in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    // a panicking task fails itself, not the executor
                    Err(e) => TaskOutcome::Failure(format!("task {} panicked: {}", name, e)),
                };

                if !outcome.is_success() {
                    stage_passed = false;
                }
                results.entry(name).or_default().push(outcome);
            }

            if !stage_passed {
                success = false;
                self.log.push(format!("stage {} failed", stage_index));
                if pipeline.early_stopping {
                    self.log.push("skipping remaining stages".to_string());
                    break;
                }
            }
        }

        (success, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::RunnableTask;
    use async_trait::async_trait;
    use netunicorn_core::domain::environment::EnvironmentDefinition;
    use netunicorn_core::domain::task::TaskSpec;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        value: serde_json::Value,
    }

    #[async_trait]
    impl RunnableTask for Recorder {
        async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
            TaskOutcome::Success(self.value.clone())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl RunnableTask for AlwaysFails {
        async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
            TaskOutcome::Failure("intentional failure".to_string())
        }
    }

    /// Succeeds only if the snapshot already contains the named result.
    struct RequiresPrior {
        prior_name: String,
    }

    #[async_trait]
    impl RunnableTask for RequiresPrior {
        async fn run(&self, ctx: &TaskContext) -> TaskOutcome {
            if ctx.previous.contains_key(&self.prior_name) {
                TaskOutcome::Success(json!("prior visible"))
            } else {
                TaskOutcome::Failure(format!("prior result {} not visible", self.prior_name))
            }
        }
    }

    fn test_registry() -> TaskRegistry {
        let mut registry = TaskRegistry::empty();
        registry.register("record", |spec| {
            Ok(Box::new(Recorder {
                value: spec.params.clone(),
            }) as Box<dyn RunnableTask>)
        });
        registry.register("always_fails", |_| Ok(Box::new(AlwaysFails) as Box<dyn RunnableTask>));
        registry.register("requires_prior", |spec| {
            let prior_name = spec
                .params
                .get("prior")
                .and_then(|v| v.as_str())
                .ok_or("requires_prior needs a prior parameter")?
                .to_string();
            Ok(Box::new(RequiresPrior { prior_name }) as Box<dyn RunnableTask>)
        });
        registry
    }

    fn interpreter(registry: TaskRegistry) -> PipelineInterpreter {
        PipelineInterpreter::new(
            Arc::new(registry),
            GatewayClient::new("http://127.0.0.1:1"),
            "exp-1".to_string(),
            "exec-1".to_string(),
            4,
        )
    }

    #[tokio::test]
    async fn all_stages_execute_in_order_and_all_succeed() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell())
            .then(TaskSpec::new("record").with_name("start").with_params(json!(1)))
            .then_stage([
                TaskSpec::new("record").with_name("mid-a").with_params(json!(2)),
                TaskSpec::new("record").with_name("mid-b").with_params(json!(3)),
            ])
            .then(
                TaskSpec::new("requires_prior")
                    .with_name("end")
                    .with_params(json!({"prior": "mid-a"})),
            );

        let (success, results) = interpreter(test_registry()).execute(&pipeline).await;
        assert!(success);
        assert_eq!(results.len(), 4);
        assert!(results["end"][0].is_success());
    }

    #[tokio::test]
    async fn failing_stage_skips_the_rest() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell())
            .then(TaskSpec::new("record").with_name("first").with_params(json!(1)))
            .then_stage([
                TaskSpec::new("always_fails").with_name("breaks"),
                TaskSpec::new("record").with_name("sibling").with_params(json!(2)),
            ])
            .then(TaskSpec::new("record").with_name("never").with_params(json!(3)));

        let (success, results) = interpreter(test_registry()).execute(&pipeline).await;
        assert!(!success);
        // the failing stage's siblings still settled
        assert!(results.contains_key("breaks"));
        assert!(results.contains_key("sibling"));
        // stages after the failure never ran
        assert!(!results.contains_key("never"));
    }

    #[tokio::test]
    async fn early_stopping_off_runs_every_stage() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell())
            .then(TaskSpec::new("always_fails").with_name("breaks"))
            .then(TaskSpec::new("record").with_name("still-runs").with_params(json!(1)));

        let mut pipeline = pipeline;
        pipeline.early_stopping = false;

        let (success, results) = interpreter(test_registry()).execute(&pipeline).await;
        assert!(!success);
        assert!(results.contains_key("still-runs"));
    }

    #[tokio::test]
    async fn repeated_task_names_accumulate_history() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell())
            .then(TaskSpec::new("record").with_name("probe").with_params(json!(1)))
            .then(TaskSpec::new("record").with_name("probe").with_params(json!(2)))
            .then(TaskSpec::new("record").with_name("probe").with_params(json!(3)));

        let (success, results) = interpreter(test_registry()).execute(&pipeline).await;
        assert!(success);
        assert_eq!(
            results["probe"],
            vec![
                TaskOutcome::Success(json!(1)),
                TaskOutcome::Success(json!(2)),
                TaskOutcome::Success(json!(3)),
            ]
        );
    }

    #[tokio::test]
    async fn tasks_in_a_stage_cannot_see_each_other() {
        // both orderings must fail: the snapshot was taken before the stage
        let pipeline = Pipeline::new(EnvironmentDefinition::shell()).then_stage([
            TaskSpec::new("record").with_name("peer").with_params(json!(1)),
            TaskSpec::new("requires_prior")
                .with_name("spy")
                .with_params(json!({"prior": "peer"})),
        ]);

        let (success, results) = interpreter(test_registry()).execute(&pipeline).await;
        assert!(!success);
        assert!(!results["spy"][0].is_success());
    }

    #[tokio::test]
    async fn unknown_task_kind_fails_only_that_task() {
        let pipeline = Pipeline::new(EnvironmentDefinition::shell())
            .then_stage([
                TaskSpec::new("record").with_name("fine").with_params(json!(1)),
                TaskSpec::new("no_such_kind").with_name("unknown"),
            ]);

        let (success, results) = interpreter(test_registry()).execute(&pipeline).await;
        assert!(!success);
        assert!(results["fine"][0].is_success());
        match &results["unknown"][0] {
            TaskOutcome::Failure(description) => {
                assert!(description.contains("unknown task kind"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        static RUNNING: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        struct Tracked;

        #[async_trait]
        impl RunnableTask for Tracked {
            async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
                let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
                PEAK.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                RUNNING.fetch_sub(1, Ordering::SeqCst);
                TaskOutcome::Success(json!(null))
            }
        }

        let mut registry = TaskRegistry::empty();
        registry.register("tracked", |_| Ok(Box::new(Tracked) as Box<dyn RunnableTask>));

        let interpreter = PipelineInterpreter::new(
            Arc::new(registry),
            GatewayClient::new("http://127.0.0.1:1"),
            "exp-1".to_string(),
            "exec-1".to_string(),
            2,
        );

        let pipeline = Pipeline::new(EnvironmentDefinition::shell()).then_stage(
            (0..8).map(|i| TaskSpec::new("tracked").with_name(format!("t-{i}"))),
        );

        let (success, _) = interpreter.execute(&pipeline).await;
        assert!(success);
        assert!(PEAK.load(Ordering::SeqCst) <= 2);
    }
}
