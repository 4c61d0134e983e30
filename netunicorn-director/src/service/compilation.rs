//! Compilation Service
//!
//! Turns `(environment definition, pipeline, architecture)` triples into
//! deployable images. Workers claim pending rows through the repository's
//! compare-and-set and run builds concurrently up to a configured cap;
//! per-row work stays serialized by the claim itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netunicorn_core::domain::architecture::Architecture;
use netunicorn_core::domain::environment::EnvironmentDefinition;
use tokio::sync::Semaphore;

use crate::repository::compilation::{self as compilation_repository, CompilationJob};
use crate::state::AppState;

const DEFAULT_BASE_IMAGE: &str = "debian:stable-slim";
const EXECUTOR_BINARY_NAME: &str = "netunicorn-executor";

/// Everything the image build runtime needs for one artifact.
#[derive(Debug, Clone)]
pub struct BuildRecipe {
    /// Full tag of the resulting artifact.
    pub tag: String,
    /// Container platform, e.g. `linux/amd64`.
    pub platform: String,
    pub dockerfile: String,
    /// Serialized pipeline, written next to the Dockerfile.
    pub pipeline: Vec<u8>,
}

/// The command-producing seam to the image build runtime.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds and pushes the artifact; returns the build log, or the error
    /// log on failure.
    async fn build(&self, recipe: &BuildRecipe) -> Result<String, String>;
}

/// Renders the build recipe for a claimed compilation.
///
/// The environment either starts from a provided base image and runs its
/// commands, or from the default base; the serialized pipeline and the
/// executor agent are baked into the image either way.
pub fn render_recipe(job: &CompilationJob, registry_url: &str) -> Result<BuildRecipe, String> {
    let EnvironmentDefinition::DockerImage { image, commands } = &job.environment_definition
    else {
        return Err("shell environments do not require compilation".to_string());
    };

    let architecture = Architecture::from_str_or_unknown(&job.architecture);
    let Some(platform) = architecture.platform() else {
        return Err(format!(
            "unknown architecture for image build: {}",
            job.architecture
        ));
    };

    let base_image = image.as_deref().unwrap_or(DEFAULT_BASE_IMAGE);

    let mut lines = vec![
        format!("FROM {}", base_image),
        "ENV DEBIAN_FRONTEND=noninteractive".to_string(),
    ];
    for command in commands {
        lines.push(format!("RUN {}", command.trim_start_matches("sudo ")));
    }
    lines.push(format!(
        "COPY {} /usr/local/bin/{}",
        EXECUTOR_BINARY_NAME, EXECUTOR_BINARY_NAME
    ));
    lines.push("COPY netunicorn.pipeline /netunicorn.pipeline".to_string());
    lines.push("WORKDIR /".to_string());
    lines.push(format!("CMD [\"/usr/local/bin/{}\"]", EXECUTOR_BINARY_NAME));

    let tag = format!(
        "{}/{}-{}:{}",
        registry_url.trim_end_matches('/'),
        job.experiment_id,
        job.compilation_id,
        job.architecture
    );

    Ok(BuildRecipe {
        tag,
        platform: platform.to_string(),
        dockerfile: lines.join("\n") + "\n",
        pipeline: job.pipeline.clone(),
    })
}

/// Builds images by shelling out to `docker buildx`.
pub struct DockerBuilder {
    /// Prebuilt executor binary copied into every image.
    executor_binary: PathBuf,
}

impl DockerBuilder {
    pub fn new(executor_binary: impl Into<PathBuf>) -> Self {
        Self {
            executor_binary: executor_binary.into(),
        }
    }
}

#[async_trait]
impl ImageBuilder for DockerBuilder {
    async fn build(&self, recipe: &BuildRecipe) -> Result<String, String> {
        let context_dir = std::env::temp_dir().join(format!("netunicorn-build-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&context_dir)
            .await
            .map_err(|e| format!("failed to create build context: {}", e))?;

        let result = async {
            tokio::fs::write(context_dir.join("Dockerfile"), &recipe.dockerfile)
                .await
                .map_err(|e| format!("failed to write Dockerfile: {}", e))?;
            tokio::fs::write(context_dir.join("netunicorn.pipeline"), &recipe.pipeline)
                .await
                .map_err(|e| format!("failed to write pipeline: {}", e))?;
            tokio::fs::copy(
                &self.executor_binary,
                context_dir.join(EXECUTOR_BINARY_NAME),
            )
            .await
            .map_err(|e| format!("failed to copy executor binary: {}", e))?;

            let output = tokio::process::Command::new("docker")
                .arg("buildx")
                .arg("build")
                .arg("--platform")
                .arg(&recipe.platform)
                .arg("-t")
                .arg(&recipe.tag)
                .arg("--push")
                .arg(".")
                .current_dir(&context_dir)
                .output()
                .await
                .map_err(|e| format!("failed to run docker buildx: {}", e))?;

            let log = format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );

            if output.status.success() {
                Ok(log)
            } else {
                Err(log)
            }
        }
        .await;

        let _ = tokio::fs::remove_dir_all(&context_dir).await;
        result
    }
}

/// Polls for pending compilations and drives them to a terminal status.
pub async fn run_compilation_worker(state: AppState, builder: Arc<dyn ImageBuilder>) {
    let poll_interval = Duration::from_secs(state.config.compilation.poll_interval_seconds);
    let permits = Arc::new(Semaphore::new(state.config.compilation.max_concurrent_builds));
    let mut last_served_experiment: Option<String> = None;

    tracing::info!(
        "Compilation worker started (max {} concurrent builds)",
        state.config.compilation.max_concurrent_builds
    );

    loop {
        let claimed =
            compilation_repository::claim_next(&state.pool, last_served_experiment.as_deref())
                .await;

        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Err(e) => {
                tracing::error!("Failed to claim a compilation: {}", e);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        last_served_experiment = Some(job.experiment_id.clone());

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let state = state.clone();
        let builder = Arc::clone(&builder);

        tokio::spawn(async move {
            compile_one(&state, builder.as_ref(), &job).await;
            drop(permit);
        });
    }
}

async fn compile_one(state: &AppState, builder: &dyn ImageBuilder, job: &CompilationJob) {
    tracing::info!(
        "Compiling {} for experiment {} ({})",
        job.compilation_id,
        job.experiment_id,
        job.architecture
    );

    let (success, log) = match render_recipe(job, &state.config.registry.url) {
        Ok(recipe) => match builder.build(&recipe).await {
            Ok(log) => (true, log),
            Err(log) => (false, log),
        },
        Err(reason) => (false, reason),
    };

    if let Err(e) = compilation_repository::record_result(
        &state.pool,
        &job.experiment_id,
        &job.compilation_id,
        success,
        &log,
    )
    .await
    {
        tracing::error!(
            "Failed to record compilation result for {}: {}",
            job.compilation_id,
            e
        );
        return;
    }

    tracing::info!(
        "Compilation {} finished: {}",
        job.compilation_id,
        if success { "success" } else { "failure" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use netunicorn_core::domain::architecture::Architecture;

    fn docker_job(image: Option<&str>, commands: &[&str]) -> CompilationJob {
        CompilationJob {
            experiment_id: "exp-1".to_string(),
            compilation_id: "abcd1234".to_string(),
            architecture: Architecture::LinuxAmd64.as_str().to_string(),
            pipeline: b"pipeline-bytes".to_vec(),
            environment_definition: EnvironmentDefinition::DockerImage {
                image: image.map(String::from),
                commands: commands.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    #[test]
    fn recipe_tags_artifact_with_experiment_and_compilation() {
        let recipe = render_recipe(&docker_job(None, &[]), "registry.local:5000").unwrap();
        assert_eq!(recipe.tag, "registry.local:5000/exp-1-abcd1234:linux_amd64");
        assert_eq!(recipe.platform, "linux/amd64");
        assert!(recipe.dockerfile.starts_with("FROM debian:stable-slim\n"));
    }

    #[test]
    fn recipe_uses_provided_base_image_and_strips_sudo() {
        let recipe = render_recipe(
            &docker_job(Some("ubuntu:22.04"), &["sudo apt update", "apt install -y iperf3"]),
            "registry.local:5000",
        )
        .unwrap();
        assert!(recipe.dockerfile.contains("FROM ubuntu:22.04"));
        assert!(recipe.dockerfile.contains("RUN apt update"));
        assert!(recipe.dockerfile.contains("RUN apt install -y iperf3"));
        assert!(!recipe.dockerfile.contains("sudo"));
    }

    #[test]
    fn recipe_bakes_pipeline_and_executor_in() {
        let recipe = render_recipe(&docker_job(None, &[]), "registry.local:5000").unwrap();
        assert!(recipe
            .dockerfile
            .contains("COPY netunicorn.pipeline /netunicorn.pipeline"));
        assert!(recipe
            .dockerfile
            .contains("CMD [\"/usr/local/bin/netunicorn-executor\"]"));
        assert_eq!(recipe.pipeline, b"pipeline-bytes");
    }

    #[test]
    fn unknown_architecture_is_rejected() {
        let mut job = docker_job(None, &[]);
        job.architecture = "windows_x86".to_string();
        assert!(render_recipe(&job, "registry.local:5000").is_err());
    }

    #[test]
    fn shell_environments_are_not_compiled() {
        let mut job = docker_job(None, &[]);
        job.environment_definition = EnvironmentDefinition::shell();
        assert!(render_recipe(&job, "registry.local:5000").is_err());
    }
}
