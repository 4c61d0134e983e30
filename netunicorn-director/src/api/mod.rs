//! Mediator API
//!
//! User-facing HTTP surface of the director. Every route except the health
//! check authenticates through BasicAuth and authorizes by owner match or
//! the sudo bit.

pub mod auth;
pub mod error;
pub mod experiment;
pub mod health;
pub mod nodes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the mediator router with all endpoints
pub fn create_mediator_router(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health::healthcheck))
        .route("/nodes", get(nodes::list_nodes))
        // Experiment lifecycle
        .route("/experiment", post(experiment::submit_experiment))
        .route("/experiment/{name}", get(experiment::experiment_status))
        .route("/experiment/{name}", delete(experiment::delete_experiment))
        .route("/experiment/{name}/prepare", post(experiment::prepare_experiment))
        .route("/experiment/{name}/start", post(experiment::start_experiment))
        .route("/experiment/{name}/cancel", post(experiment::cancel_experiment))
        // Flags
        .route("/experiment/{name}/flag/{key}", get(experiment::get_flag))
        .route("/experiment/{name}/flag/{key}", post(experiment::set_flag))
        .route(
            "/experiment/{name}/flag/{key}/increment",
            post(experiment::increment_flag),
        )
        .route(
            "/experiment/{name}/flag/{key}/decrement",
            post(experiment::decrement_flag),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
