//! Executor Repository
//!
//! Executor rows are created at experiment start and updated by the gateway
//! (heartbeats, results) and the processor (liveness errors).

use netunicorn_core::domain::executor::ExecutorState;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutorRecord {
    pub executor_id: String,
    pub node_name: String,
    pub connector: String,
    pub result: Option<Vec<u8>>,
    pub keepalive_time: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
    pub finished: bool,
}

pub async fn create(
    pool: &PgPool,
    experiment_id: &str,
    executor_id: &str,
    node_name: &str,
    connector: &str,
    pipeline: &[u8],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO executors (experiment_id, executor_id, node_name, connector, pipeline)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(experiment_id)
    .bind(executor_id)
    .bind(node_name)
    .bind(connector)
    .bind(pipeline)
    .execute(pool)
    .await?;

    Ok(())
}

/// Creates an executor row that is already finished with an error, for
/// deployments that never reached a node (failed compilation or deploy).
pub async fn create_finished(
    pool: &PgPool,
    experiment_id: &str,
    executor_id: &str,
    node_name: &str,
    connector: &str,
    pipeline: &[u8],
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO executors
            (experiment_id, executor_id, node_name, connector, pipeline, error, finished, state)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
        "#,
    )
    .bind(experiment_id)
    .bind(executor_id)
    .bind(node_name)
    .bind(connector)
    .bind(pipeline)
    .bind(error)
    .bind(ExecutorState::Failed.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Serialized pipeline for a started, non-finished executor.
pub async fn find_pipeline(
    pool: &PgPool,
    executor_id: &str,
) -> Result<Option<Vec<u8>>, sqlx::Error> {
    sqlx::query_scalar::<_, Vec<u8>>(
        "SELECT pipeline FROM executors WHERE executor_id = $1 AND finished = FALSE",
    )
    .bind(executor_id)
    .fetch_optional(pool)
    .await
}

/// Records a heartbeat; returns false for unknown executors.
pub async fn heartbeat(
    pool: &PgPool,
    executor_id: &str,
    state: Option<ExecutorState>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE executors SET keepalive_time = $1, state = COALESCE($2, state) WHERE executor_id = $3",
    )
    .bind(chrono::Utc::now())
    .bind(state.map(|s| s.as_str()))
    .bind(executor_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Stores a final result. First submission wins; repeats are ignored.
///
/// Returns false for unknown executors.
pub async fn submit_result(
    pool: &PgPool,
    executor_id: &str,
    state: ExecutorState,
    result: &[u8],
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        r#"
        UPDATE executors SET result = $1, finished = TRUE, state = $2
        WHERE executor_id = $3 AND finished = FALSE
        "#,
    )
    .bind(result)
    .bind(state.as_str())
    .bind(executor_id)
    .execute(pool)
    .await?;

    if updated.rows_affected() > 0 {
        return Ok(true);
    }

    // distinguish "already finished" (idempotent success) from "unknown"
    let exists =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM executors WHERE executor_id = $1")
            .bind(executor_id)
            .fetch_one(pool)
            .await?;

    Ok(exists > 0)
}

/// Marks an executor as terminally failed (liveness errors, stop requests).
pub async fn mark_failed(
    pool: &PgPool,
    executor_id: &str,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE executors SET finished = TRUE, error = $1, state = $2
        WHERE executor_id = $3 AND finished = FALSE
        "#,
    )
    .bind(error)
    .bind(ExecutorState::Failed.as_str())
    .bind(executor_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn list_for_experiment(
    pool: &PgPool,
    experiment_id: &str,
) -> Result<Vec<ExecutorRecord>, sqlx::Error> {
    sqlx::query_as::<_, ExecutorRecord>(
        r#"
        SELECT executor_id, node_name, connector, result,
               keepalive_time, error, finished
        FROM executors
        WHERE experiment_id = $1
        "#,
    )
    .bind(experiment_id)
    .fetch_all(pool)
    .await
}

/// Locates executors by id for stop fan-out.
pub async fn find_by_ids(
    pool: &PgPool,
    executor_ids: &[String],
) -> Result<Vec<ExecutorRecord>, sqlx::Error> {
    sqlx::query_as::<_, ExecutorRecord>(
        r#"
        SELECT executor_id, node_name, connector, result,
               keepalive_time, error, finished
        FROM executors
        WHERE executor_id = ANY($1)
        "#,
    )
    .bind(executor_ids)
    .fetch_all(pool)
    .await
}
