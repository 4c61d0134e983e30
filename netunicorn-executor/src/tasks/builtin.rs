//! Built-in tasks
//!
//! A minimal library: shell commands, sleep/echo primitives, and the flag
//! tasks pipelines use to synchronize across nodes.

use std::time::Duration;

use async_trait::async_trait;
use netunicorn_core::domain::flag::FlagValues;
use netunicorn_core::domain::task::{TaskOutcome, TaskSpec};
use serde_json::json;

use super::{into_outcome, RunnableTask, TaskContext, TaskRegistry};

pub fn register_all(registry: &mut TaskRegistry) {
    registry.register("run_command", |spec| {
        let command = param_str(spec, "command")?;
        Ok(Box::new(RunCommand { command }) as Box<dyn RunnableTask>)
    });

    registry.register("sleep", |spec| {
        let seconds = spec
            .params
            .get("seconds")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        Ok(Box::new(Sleep { seconds }) as Box<dyn RunnableTask>)
    });

    registry.register("echo", |spec| {
        let value = spec.params.get("value").cloned().unwrap_or(json!(null));
        Ok(Box::new(Echo { value }) as Box<dyn RunnableTask>)
    });

    registry.register("set_flag", |spec| {
        let key = param_str(spec, "key")?;
        let values = FlagValues {
            text_value: spec
                .params
                .get("text_value")
                .and_then(|v| v.as_str())
                .map(String::from),
            int_value: spec.params.get("int_value").and_then(|v| v.as_i64()),
        };
        Ok(Box::new(SetFlag { key, values }) as Box<dyn RunnableTask>)
    });

    registry.register("increment_flag", |spec| {
        let key = param_str(spec, "key")?;
        Ok(Box::new(BumpFlag { key, up: true }) as Box<dyn RunnableTask>)
    });

    registry.register("decrement_flag", |spec| {
        let key = param_str(spec, "key")?;
        Ok(Box::new(BumpFlag { key, up: false }) as Box<dyn RunnableTask>)
    });

    registry.register("wait_for_flag", |spec| {
        let key = param_str(spec, "key")?;
        let text_value = param_str(spec, "text_value")?;
        let int_value = spec
            .params
            .get("int_value")
            .and_then(|v| v.as_i64())
            .ok_or("wait_for_flag requires an int_value parameter")?;
        let poll_interval = Duration::from_secs_f64(
            spec.params
                .get("poll_seconds")
                .and_then(|v| v.as_f64())
                .unwrap_or(2.0),
        );
        let timeout = Duration::from_secs(
            spec.params
                .get("timeout_seconds")
                .and_then(|v| v.as_u64())
                .unwrap_or(600),
        );
        Ok(Box::new(WaitForFlag {
            key,
            text_value,
            int_value,
            poll_interval,
            timeout,
        }) as Box<dyn RunnableTask>)
    });
}

fn param_str(spec: &TaskSpec, key: &str) -> Result<String, String> {
    spec.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| format!("{} requires a {} parameter", spec.kind, key))
}

/// Runs a shell command, capturing its output into the log bundle.
struct RunCommand {
    command: String,
}

#[async_trait]
impl RunnableTask for RunCommand {
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        let output = match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return TaskOutcome::Failure(format!(
                    "failed to run command {}: {}",
                    self.command, e
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        ctx.log.push_lines(&stdout);
        ctx.log.push_lines(&stderr);

        if output.status.success() {
            TaskOutcome::Success(json!({
                "exit_code": 0,
                "stdout": stdout,
            }))
        } else {
            TaskOutcome::Failure(format!(
                "command {} exited with {}: {}",
                self.command,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ))
        }
    }
}

struct Sleep {
    seconds: f64,
}

#[async_trait]
impl RunnableTask for Sleep {
    async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
        tokio::time::sleep(Duration::from_secs_f64(self.seconds)).await;
        TaskOutcome::Success(json!(self.seconds))
    }
}

/// Returns its configured value; handy for wiring results between stages.
struct Echo {
    value: serde_json::Value,
}

#[async_trait]
impl RunnableTask for Echo {
    async fn run(&self, _ctx: &TaskContext) -> TaskOutcome {
        TaskOutcome::Success(self.value.clone())
    }
}

struct SetFlag {
    key: String,
    values: FlagValues,
}

#[async_trait]
impl RunnableTask for SetFlag {
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        into_outcome(
            ctx.gateway
                .set_flag(&ctx.experiment_id, &self.key, &self.values)
                .await
                .map(|_| json!(self.key))
                .map_err(|e| format!("failed to set flag {}: {}", self.key, e)),
        )
    }
}

struct BumpFlag {
    key: String,
    up: bool,
}

#[async_trait]
impl RunnableTask for BumpFlag {
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        let result = if self.up {
            ctx.gateway.increment_flag(&ctx.experiment_id, &self.key).await
        } else {
            ctx.gateway.decrement_flag(&ctx.experiment_id, &self.key).await
        };

        into_outcome(
            result
                .map(|_| json!(self.key))
                .map_err(|e| format!("failed to update flag {}: {}", self.key, e)),
        )
    }
}

/// Spin-polls the gateway until the flag matches the expected tuple.
///
/// The platform only guarantees atomicity of flag updates; waiting is the
/// client's business, which is exactly what this task implements.
struct WaitForFlag {
    key: String,
    text_value: String,
    int_value: i64,
    poll_interval: Duration,
    timeout: Duration,
}

#[async_trait]
impl RunnableTask for WaitForFlag {
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            match ctx.gateway.get_flag(&ctx.experiment_id, &self.key).await {
                Ok(values) if values.matches(&self.text_value, self.int_value) => {
                    return TaskOutcome::Success(json!({
                        "key": self.key,
                        "text_value": self.text_value,
                        "int_value": self.int_value,
                    }));
                }
                Ok(_) => {}
                // not written yet, or a transient gateway error: keep polling
                Err(e) if e.is_not_found() || e.is_retryable() => {}
                Err(e) => {
                    return TaskOutcome::Failure(format!(
                        "failed to read flag {}: {}",
                        self.key, e
                    ));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return TaskOutcome::Failure(format!(
                    "timed out waiting for flag {} to reach ({}, {})",
                    self.key, self.text_value, self.int_value
                ));
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuf::LogBuffer;
    use netunicorn_client::GatewayClient;
    use netunicorn_core::domain::task::TaskResults;

    fn context() -> TaskContext {
        TaskContext {
            experiment_id: "exp-1".to_string(),
            previous: TaskResults::new(),
            gateway: GatewayClient::new("http://127.0.0.1:1"),
            log: LogBuffer::new(),
        }
    }

    #[tokio::test]
    async fn echo_returns_its_value() {
        let task = Echo {
            value: json!({"answer": 42}),
        };
        let outcome = task.run(&context()).await;
        assert_eq!(outcome, TaskOutcome::Success(json!({"answer": 42})));
    }

    #[tokio::test]
    async fn run_command_captures_output_and_exit_status() {
        let ctx = context();
        let task = RunCommand {
            command: "echo hello-netunicorn".to_string(),
        };
        let outcome = task.run(&ctx).await;
        assert!(outcome.is_success());
        assert!(ctx
            .log
            .drain()
            .iter()
            .any(|line| line.contains("hello-netunicorn")));
    }

    #[tokio::test]
    async fn failing_command_becomes_a_failure_outcome() {
        let task = RunCommand {
            command: "exit 3".to_string(),
        };
        let outcome = task.run(&context()).await;
        match outcome {
            TaskOutcome::Failure(description) => assert!(description.contains("exited with 3")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn missing_required_params_fail_at_build_time() {
        let registry = TaskRegistry::with_builtins();
        assert!(registry.build(&TaskSpec::new("run_command")).is_err());
        assert!(registry.build(&TaskSpec::new("set_flag")).is_err());
        assert!(registry
            .build(&TaskSpec::new("wait_for_flag").with_params(json!({"key": "k"})))
            .is_err());
    }
}
