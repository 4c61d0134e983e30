//! Health Check Handler

use axum::extract::State;
use axum::http::StatusCode;

use crate::state::AppState;

/// GET /healthcheck
///
/// Healthy only when the store answers and every registered connector
/// reports itself healthy.
pub async fn healthcheck(State(state): State<AppState>) -> StatusCode {
    if let Err(e) = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        tracing::error!("Health check failed: database unreachable: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    for (name, connector) in state.registry.iter() {
        if let Err(e) = connector.health().await {
            tracing::warn!("Health check failed: connector {}: {}", name, e);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    StatusCode::OK
}
