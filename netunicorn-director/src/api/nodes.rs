//! Node API Handlers

use axum::{extract::State, Json};
use netunicorn_core::domain::node::Node;

use crate::api::auth::AuthContext;
use crate::api::error::ApiResult;
use crate::service::infrastructure;
use crate::state::AppState;

/// GET /nodes
/// List all nodes visible to the caller
pub async fn list_nodes(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<Node>>> {
    tracing::debug!("Listing nodes for {}", auth.username);

    let nodes = infrastructure::list_nodes(&state, &auth.access_tags).await;
    Ok(Json(nodes))
}
