//! netunicorn Executor
//!
//! The in-environment agent that drives one pipeline on one node:
//! - Loads the pipeline from a local file or from the gateway
//! - Posts heartbeats while executing
//! - Interprets the stage sequence on a bounded worker pool
//! - Reports the composite result and terminates
//!
//! State machine: LOADING → EXECUTING → REPORTING → TERMINATED, with FAILED
//! as the terminal state for transport and load errors.

mod config;
mod execution;
mod logbuf;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use netunicorn_client::GatewayClient;
use netunicorn_core::domain::executor::ExecutorState;
use netunicorn_core::domain::pipeline::Pipeline;
use netunicorn_core::dto::ExecutionReport;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::execution::PipelineInterpreter;
use crate::tasks::TaskRegistry;

/// Pipeline file baked into compiled environments.
const LOCAL_PIPELINE_FILE: &str = "netunicorn.pipeline";

const FETCH_MAX_ATTEMPTS: u32 = 10;
const FETCH_INITIAL_DELAY_MS: u64 = 500;
const FETCH_MAX_DELAY_MS: u64 = 30_000;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netunicorn_executor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid executor configuration")?;
    info!(
        "Starting executor {} for experiment {} (gateway {})",
        config.executor_id, config.experiment_id, config.gateway_endpoint
    );

    let gateway = GatewayClient::new(config.gateway_endpoint.clone());

    // LOADING
    let pipeline = match load_pipeline(&gateway, &config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to load a pipeline: {:#}", e);
            // best effort: let the director know this executor is done for
            let report = ExecutionReport {
                success: false,
                results: Default::default(),
                log: vec![format!("failed to load a pipeline: {:#}", e)],
            };
            let _ = gateway
                .post_result(&config.executor_id, ExecutorState::Failed, report.serialize())
                .await;
            return Err(e);
        }
    };

    info!(
        "Loaded pipeline {} with {} stage(s)",
        pipeline.name,
        pipeline.stages.len()
    );

    // EXECUTING
    let heartbeat_handle = config.heartbeat.then(|| spawn_heartbeat_loop(&gateway, &config));

    let interpreter = PipelineInterpreter::new(
        Arc::new(TaskRegistry::with_builtins()),
        gateway.clone(),
        config.experiment_id.clone(),
        config.executor_id.clone(),
        config.max_parallel_tasks,
    );

    let (success, results) = interpreter.execute(&pipeline).await;

    if let Some(handle) = heartbeat_handle {
        handle.abort();
    }

    info!(
        "Pipeline finished: {}",
        if success { "success" } else { "failure" }
    );

    // REPORTING
    if pipeline.report_results {
        let report = ExecutionReport {
            success,
            results,
            log: interpreter.log.drain(),
        };
        report_with_retry(&gateway, &config, report).await;
    } else {
        info!("Skipping result reporting due to pipeline setting");
    }

    info!("Executor {} terminated", config.executor_id);
    Ok(())
}

/// Loads the pipeline from the local file if present, otherwise from the
/// gateway with exponential backoff up to a bounded attempt budget.
async fn load_pipeline(gateway: &GatewayClient, config: &Config) -> Result<Pipeline> {
    if let Ok(bytes) = tokio::fs::read(LOCAL_PIPELINE_FILE).await {
        info!("Pipeline loaded from the local file");
        return Pipeline::deserialize(&bytes).context("local pipeline file is malformed");
    }

    let mut delay = Duration::from_millis(FETCH_INITIAL_DELAY_MS);
    for attempt in 1..=FETCH_MAX_ATTEMPTS {
        match gateway.get_pipeline(&config.executor_id).await {
            Ok(bytes) => {
                info!("Pipeline received from the gateway");
                return Pipeline::deserialize(&bytes).context("gateway pipeline is malformed");
            }
            Err(e) => {
                warn!(
                    "Failed to fetch the pipeline (attempt {}/{}): {}",
                    attempt, FETCH_MAX_ATTEMPTS, e
                );
            }
        }

        if attempt < FETCH_MAX_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_millis(FETCH_MAX_DELAY_MS));
        }
    }

    anyhow::bail!(
        "could not obtain a pipeline after {} attempts",
        FETCH_MAX_ATTEMPTS
    )
}

/// Posts a heartbeat every interval until aborted. Failures are logged and
/// ignored; the processor is the authority on liveness.
fn spawn_heartbeat_loop(gateway: &GatewayClient, config: &Config) -> tokio::task::JoinHandle<()> {
    let gateway = gateway.clone();
    let executor_id = config.executor_id.clone();
    let interval = config.heartbeat_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // the first tick fires immediately

        loop {
            ticker.tick().await;
            if let Err(e) = gateway
                .send_heartbeat(&executor_id, ExecutorState::Executing)
                .await
            {
                warn!("Failed to send a heartbeat: {}", e);
            }
        }
    })
}

/// Posts the final report; the gateway keeps the first submission, so a
/// retry after a half-delivered request is safe.
async fn report_with_retry(gateway: &GatewayClient, config: &Config, report: ExecutionReport) {
    let payload = report.serialize();
    let mut delay = Duration::from_millis(FETCH_INITIAL_DELAY_MS);

    for attempt in 1..=FETCH_MAX_ATTEMPTS {
        match gateway
            .post_result(&config.executor_id, ExecutorState::Terminated, payload.clone())
            .await
        {
            Ok(()) => {
                info!("Results reported");
                return;
            }
            Err(e) => {
                warn!(
                    "Failed to report results (attempt {}/{}): {}",
                    attempt, FETCH_MAX_ATTEMPTS, e
                );
            }
        }

        if attempt < FETCH_MAX_ATTEMPTS {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_millis(FETCH_MAX_DELAY_MS));
        }
    }

    error!("Giving up on reporting results");
}
