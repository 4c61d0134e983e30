//! netunicorn Director
//!
//! The server side of the platform: the user-facing mediator API, the
//! executor-facing gateway API, the compilation worker, and the experiment
//! processor all run from this binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod connectors;
pub mod db;
pub mod gateway;
pub mod repository;
pub mod service;
pub mod state;

use crate::api::auth::DbAuthenticator;
use crate::config::DirectorConfig;
use crate::connectors::ConnectorRegistry;
use crate::service::compilation::DockerBuilder;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "netunicorn-director", about = "netunicorn director services")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "netunicorn.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netunicorn_director=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting netunicorn director...");

    let config = DirectorConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database.url, config.database.max_connections)
        .await
        .context("failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let registry = ConnectorRegistry::from_config(
        &config.connectors,
        &config.gateway.public_endpoint,
        config.processor.connector_concurrency,
    )
    .context("failed to initialize connectors")?;

    let auth = Arc::new(DbAuthenticator::new(pool.clone()));
    let builder = Arc::new(DockerBuilder::new(config.compilation.executor_binary.clone()));

    let mediator_addr = format!("{}:{}", config.mediator.host, config.mediator.port);
    let gateway_addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = AppState::new(pool, registry, config, auth);

    let mediator_app = api::create_mediator_router(state.clone());
    let gateway_app = gateway::create_gateway_router(state.clone());

    let mediator_listener = tokio::net::TcpListener::bind(&mediator_addr)
        .await
        .with_context(|| format!("failed to bind mediator to {}", mediator_addr))?;
    let gateway_listener = tokio::net::TcpListener::bind(&gateway_addr)
        .await
        .with_context(|| format!("failed to bind gateway to {}", gateway_addr))?;

    tracing::info!("Mediator listening on {}", mediator_addr);
    tracing::info!("Gateway listening on {}", gateway_addr);

    let mediator = tokio::spawn(async move {
        axum::serve(mediator_listener, mediator_app).await
    });
    let gateway_server = tokio::spawn(async move {
        axum::serve(gateway_listener, gateway_app).await
    });
    let compilation_worker = tokio::spawn(service::compilation::run_compilation_worker(
        state.clone(),
        builder,
    ));
    let processor = tokio::spawn(service::processor::run_processor(state));

    // all four are expected to run forever; any exit is fatal
    tokio::select! {
        result = mediator => {
            result.context("mediator task panicked")?.context("mediator server failed")?;
            anyhow::bail!("mediator server exited unexpectedly");
        }
        result = gateway_server => {
            result.context("gateway task panicked")?.context("gateway server failed")?;
            anyhow::bail!("gateway server exited unexpectedly");
        }
        result = compilation_worker => {
            result.context("compilation worker panicked")?;
            anyhow::bail!("compilation worker exited unexpectedly");
        }
        result = processor => {
            result.context("experiment processor panicked")?;
            anyhow::bail!("experiment processor exited unexpectedly");
        }
    }
}
