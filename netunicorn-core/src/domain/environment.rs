//! Environment definitions for deployments

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::architecture::Architecture;

/// How the execution environment for a deployment is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EnvironmentDefinition {
    /// Commands executed in the node's own shell; no image is built.
    ShellExecution { commands: Vec<String> },
    /// A container image, either pre-built (`image` set) or built by the
    /// compilation service from the commands.
    DockerImage {
        image: Option<String>,
        commands: Vec<String>,
    },
}

impl EnvironmentDefinition {
    pub fn shell() -> Self {
        EnvironmentDefinition::ShellExecution {
            commands: Vec::new(),
        }
    }

    pub fn docker() -> Self {
        EnvironmentDefinition::DockerImage {
            image: None,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[String] {
        match self {
            EnvironmentDefinition::ShellExecution { commands } => commands,
            EnvironmentDefinition::DockerImage { commands, .. } => commands,
        }
    }

    /// Appends an environment setup command (task prerequisites land here).
    pub fn push_command(&mut self, command: String) {
        match self {
            EnvironmentDefinition::ShellExecution { commands } => commands.push(command),
            EnvironmentDefinition::DockerImage { commands, .. } => commands.push(command),
        }
    }

    pub fn requires_build(&self) -> bool {
        matches!(self, EnvironmentDefinition::DockerImage { .. })
    }

    /// Content fingerprint of `(environment, pipeline, architecture)`:
    /// the lowercase hex sha256 over the canonical JSON of the definition,
    /// the pipeline bytes, and the architecture string.
    ///
    /// Deployments with equal fingerprints share one compilation row and one
    /// build artifact.
    pub fn fingerprint(&self, pipeline: &[u8], architecture: Architecture) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(self).expect("environment definition serializes"));
        hasher.update(pipeline);
        hasher.update(architecture.as_str().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_inputs_share_a_fingerprint() {
        let env = EnvironmentDefinition::docker();
        let a = env.fingerprint(b"pipeline", Architecture::LinuxAmd64);
        let b = env.fingerprint(b"pipeline", Architecture::LinuxAmd64);
        assert_eq!(a, b);
        // full sha256 digest, lowercase hex
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_varies_with_architecture_and_pipeline() {
        let env = EnvironmentDefinition::docker();
        let base = env.fingerprint(b"pipeline", Architecture::LinuxAmd64);
        assert_ne!(base, env.fingerprint(b"pipeline", Architecture::LinuxArm64));
        assert_ne!(base, env.fingerprint(b"other", Architecture::LinuxAmd64));
    }

    #[test]
    fn commands_change_the_fingerprint() {
        let mut env = EnvironmentDefinition::docker();
        let before = env.fingerprint(b"pipeline", Architecture::LinuxAmd64);
        env.push_command("apt install tcpdump".to_string());
        assert_ne!(before, env.fingerprint(b"pipeline", Architecture::LinuxAmd64));
    }
}
