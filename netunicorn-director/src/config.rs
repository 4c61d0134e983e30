//! Director configuration
//!
//! All settings come from a YAML file, with environment variables taking
//! precedence (prefix `NETUNICORN`, `__` as the section separator, e.g.
//! `NETUNICORN__DATABASE__URL`). Connectors are enumerated here by name;
//! the name under which a connector is configured is the name deployments
//! address it by.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mediator: MediatorConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub compilation: CompilationConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub connectors: HashMap<String, ConnectorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediatorConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_mediator_port")]
    pub port: u16,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_mediator_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Endpoint under which executors inside the fleet reach the gateway.
    #[serde(default = "default_gateway_endpoint")]
    pub public_endpoint: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_gateway_port(),
            public_endpoint: default_gateway_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Container registry prefix for compiled environment images.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilationConfig {
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: usize,
    #[serde(default = "default_compilation_poll_seconds")]
    pub poll_interval_seconds: u64,
    /// Prebuilt executor binary baked into compiled images.
    #[serde(default = "default_executor_binary")]
    pub executor_binary: String,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: default_max_concurrent_builds(),
            poll_interval_seconds: default_compilation_poll_seconds(),
            executor_binary: default_executor_binary(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_processor_tick_seconds")]
    pub tick_seconds: u64,
    /// Heartbeat interval executors are expected to keep.
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_interval_seconds: u64,
    /// Hard deadline for a single connector call.
    #[serde(default = "default_connector_deadline_seconds")]
    pub connector_deadline_seconds: u64,
    /// Per-connector cap on concurrent calls.
    #[serde(default = "default_connector_concurrency")]
    pub connector_concurrency: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_processor_tick_seconds(),
            heartbeat_interval_seconds: default_heartbeat_seconds(),
            connector_deadline_seconds: default_connector_deadline_seconds(),
            connector_concurrency: default_connector_concurrency(),
        }
    }
}

/// Per-connector configuration, dispatched on `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// Spawns executor processes on the director host (development fleets).
    Local {
        #[serde(default)]
        enabled: Option<bool>,
        /// Path to the executor binary to spawn.
        executor_binary: String,
        /// Working directory for spawned executors.
        working_directory: String,
        /// Node names this connector exposes.
        nodes: Vec<String>,
    },
    /// Forwards operations to a remote fleet manager over HTTP.
    Rest {
        #[serde(default)]
        enabled: Option<bool>,
        url: String,
    },
}

impl ConnectorConfig {
    pub fn enabled(&self) -> bool {
        match self {
            ConnectorConfig::Local { enabled, .. } | ConnectorConfig::Rest { enabled, .. } => {
                enabled.unwrap_or(true)
            }
        }
    }
}

impl DirectorConfig {
    /// Loads configuration from a YAML file with environment overrides.
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("NETUNICORN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_mediator_port() -> u16 {
    26511
}

fn default_gateway_port() -> u16 {
    26512
}

fn default_gateway_endpoint() -> String {
    "http://127.0.0.1:26512".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_max_concurrent_builds() -> usize {
    4
}

fn default_compilation_poll_seconds() -> u64 {
    10
}

fn default_executor_binary() -> String {
    "/usr/local/bin/netunicorn-executor".to_string()
}

fn default_processor_tick_seconds() -> u64 {
    10
}

fn default_heartbeat_seconds() -> u64 {
    30
}

fn default_connector_deadline_seconds() -> u64 {
    120
}

fn default_connector_concurrency() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        write!(
            file,
            "database:\n  url: postgres://localhost/netunicorn\nregistry:\n  url: registry.local:5000\n"
        )
        .unwrap();

        let config = DirectorConfig::load(file.path()).unwrap();
        assert_eq!(config.mediator.port, 26511);
        assert_eq!(config.gateway.port, 26512);
        assert_eq!(config.processor.heartbeat_interval_seconds, 30);
        assert!(config.connectors.is_empty());
    }

    #[test]
    fn connectors_are_dispatched_on_kind() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        write!(
            file,
            concat!(
                "database:\n  url: postgres://localhost/netunicorn\n",
                "registry:\n  url: registry.local:5000\n",
                "connectors:\n",
                "  lab:\n",
                "    kind: rest\n",
                "    url: http://fleet.lab:8000\n",
                "  dev:\n",
                "    kind: local\n",
                "    enabled: false\n",
                "    executor_binary: /usr/bin/netunicorn-executor\n",
                "    working_directory: /tmp/netunicorn\n",
                "    nodes: [dev-1, dev-2]\n",
            )
        )
        .unwrap();

        let config = DirectorConfig::load(file.path()).unwrap();
        assert!(matches!(
            config.connectors.get("lab"),
            Some(ConnectorConfig::Rest { .. })
        ));
        assert!(!config.connectors.get("dev").unwrap().enabled());
    }
}
