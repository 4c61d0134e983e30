//! Executor configuration
//!
//! The connector injects everything the executor needs as environment
//! variables. Missing required variables terminate the executor immediately
//! with a descriptive error.

use std::time::Duration;

/// Executor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway base URL (e.g., "http://gateway:26512")
    pub gateway_endpoint: String,

    /// Experiment this executor belongs to
    pub experiment_id: String,

    /// Globally unique id of this executor, generated by the director
    pub executor_id: String,

    /// Whether to post heartbeats while executing
    pub heartbeat: bool,

    /// Interval between heartbeats
    pub heartbeat_interval: Duration,

    /// Concurrent task cap within a stage
    pub max_parallel_tasks: usize,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - NETUNICORN_GATEWAY_ENDPOINT (required)
    /// - NETUNICORN_EXPERIMENT_ID (required)
    /// - NETUNICORN_EXECUTOR_ID (required)
    /// - NETUNICORN_HEARTBEAT (optional, "true"/"false", default: true)
    /// - NETUNICORN_HEARTBEAT_SECONDS (optional, default: 30)
    /// - NETUNICORN_MAX_PARALLEL_TASKS (optional, default: 4)
    pub fn from_env() -> anyhow::Result<Self> {
        let gateway_endpoint = required_var("NETUNICORN_GATEWAY_ENDPOINT")?;
        let experiment_id = required_var("NETUNICORN_EXPERIMENT_ID")?;
        let executor_id = required_var("NETUNICORN_EXECUTOR_ID")?;

        let heartbeat = std::env::var("NETUNICORN_HEARTBEAT")
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        let heartbeat_interval = std::env::var("NETUNICORN_HEARTBEAT_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        let max_parallel_tasks = std::env::var("NETUNICORN_MAX_PARALLEL_TASKS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(4);

        let config = Self {
            gateway_endpoint: gateway_endpoint.trim_end_matches('/').to_string(),
            experiment_id,
            executor_id,
            heartbeat,
            heartbeat_interval,
            max_parallel_tasks,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.gateway_endpoint.starts_with("http://")
            && !self.gateway_endpoint.starts_with("https://")
        {
            anyhow::bail!("gateway endpoint must start with http:// or https://");
        }
        if self.heartbeat_interval.as_secs() == 0 {
            anyhow::bail!("heartbeat interval must be greater than 0");
        }
        if self.max_parallel_tasks == 0 {
            anyhow::bail!("max parallel tasks must be greater than 0");
        }
        Ok(())
    }
}

fn required_var(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable not set", name))
        .and_then(|value| {
            if value.is_empty() {
                Err(anyhow::anyhow!("{} environment variable is empty", name))
            } else {
                Ok(value)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            gateway_endpoint: "http://localhost:26512".to_string(),
            experiment_id: "exp-1".to_string(),
            executor_id: "exec-1".to_string(),
            heartbeat: true,
            heartbeat_interval: Duration::from_secs(30),
            max_parallel_tasks: 4,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn invalid_gateway_endpoint_fails_validation() {
        let mut config = test_config();
        config.gateway_endpoint = "not-a-url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_intervals_fail_validation() {
        let mut config = test_config();
        config.heartbeat_interval = Duration::from_secs(0);
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.max_parallel_tasks = 0;
        assert!(config.validate().is_err());
    }
}
