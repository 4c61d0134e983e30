//! Experiment Repository
//!
//! The experiments table holds the lifecycle status plus the full deployment
//! map as a JSONB document; the processor rewrites the document as
//! deployments settle.

use netunicorn_core::domain::experiment::{
    DeploymentExecutionResult, Experiment, ExperimentStatus,
};
use sqlx::PgPool;
use uuid::Uuid;

/// Whether an insert failed on the per-user unique name constraint.
pub fn is_unique_name_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.constraint() == Some("experiments_username_experiment_name_key")
    )
}

pub async fn create(
    pool: &PgPool,
    experiment_id: &str,
    username: &str,
    experiment_name: &str,
    experiment: &Experiment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO experiments (experiment_id, username, experiment_name, status, data, creation_time)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(experiment_id)
    .bind(username)
    .bind(experiment_name)
    .bind(ExperimentStatus::Created.as_str())
    .bind(serde_json::to_value(experiment).expect("experiment serializes"))
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn find_by_name(
    pool: &PgPool,
    username: &str,
    experiment_name: &str,
) -> Result<Option<ExperimentRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExperimentRow>(
        r#"
        SELECT experiment_id, username, experiment_name, status, data, error,
               creation_time, start_time, execution_results, cancelled
        FROM experiments
        WHERE username = $1 AND experiment_name = $2
        "#,
    )
    .bind(username)
    .bind(experiment_name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Name lookup across all users, for sudo access. Deleted experiments are
/// excluded by their rewritten username.
pub async fn find_by_name_any_user(
    pool: &PgPool,
    experiment_name: &str,
) -> Result<Option<ExperimentRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, ExperimentRow>(
        r#"
        SELECT experiment_id, username, experiment_name, status, data, error,
               creation_time, start_time, execution_results, cancelled
        FROM experiments
        WHERE experiment_name = $1 AND username NOT LIKE 'deleted_%'
        ORDER BY creation_time DESC
        LIMIT 1
        "#,
    )
    .bind(experiment_name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn list_by_status(
    pool: &PgPool,
    status: ExperimentStatus,
) -> Result<Vec<ExperimentRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ExperimentRow>(
        r#"
        SELECT experiment_id, username, experiment_name, status, data, error,
               creation_time, start_time, execution_results, cancelled
        FROM experiments
        WHERE status = $1
        ORDER BY creation_time ASC
        "#,
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Transitions status only when the current status still matches `from`.
///
/// Returns false when the guard failed, i.e. another actor moved the
/// experiment first.
pub async fn transition_status(
    pool: &PgPool,
    experiment_id: &str,
    from: ExperimentStatus,
    to: ExperimentStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE experiments SET status = $1 WHERE experiment_id = $2 AND status = $3")
        .bind(to.as_str())
        .bind(experiment_id)
        .bind(from.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_status(
    pool: &PgPool,
    experiment_id: &str,
    status: ExperimentStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET status = $1 WHERE experiment_id = $2")
        .bind(status.as_str())
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_data(
    pool: &PgPool,
    experiment_id: &str,
    experiment: &Experiment,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET data = $1 WHERE experiment_id = $2")
        .bind(serde_json::to_value(experiment).expect("experiment serializes"))
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_error(
    pool: &PgPool,
    experiment_id: &str,
    error: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET error = $1 WHERE experiment_id = $2")
        .bind(error)
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_start_time(pool: &PgPool, experiment_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET start_time = $1 WHERE experiment_id = $2")
        .bind(chrono::Utc::now())
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_execution_results(
    pool: &PgPool,
    experiment_id: &str,
    results: &[DeploymentExecutionResult],
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET execution_results = $1 WHERE experiment_id = $2")
        .bind(serde_json::to_value(results).expect("execution results serialize"))
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn mark_cancelled(pool: &PgPool, experiment_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET cancelled = TRUE WHERE experiment_id = $1")
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn mark_cleaned(pool: &PgPool, experiment_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET cleaned = TRUE WHERE experiment_id = $1")
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Soft delete: the owning username is rewritten so the row stops matching
/// the user while the unique name becomes reusable.
pub async fn soft_delete(pool: &PgPool, experiment_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE experiments SET username = $1 WHERE experiment_id = $2")
        .bind(format!("deleted_{}", Uuid::new_v4()))
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Marks PREPARING experiments older than `max_age` as UNKNOWN.
pub async fn expire_stuck_preparing(
    pool: &PgPool,
    max_age: chrono::Duration,
) -> Result<Vec<String>, sqlx::Error> {
    let cutoff = chrono::Utc::now() - max_age;
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        UPDATE experiments SET status = $1
        WHERE status = $2 AND creation_time < $3
        RETURNING experiment_id
        "#,
    )
    .bind(ExperimentStatus::Unknown.as_str())
    .bind(ExperimentStatus::Preparing.as_str())
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExperimentRow {
    experiment_id: String,
    username: String,
    experiment_name: String,
    status: String,
    data: serde_json::Value,
    error: Option<String>,
    creation_time: chrono::DateTime<chrono::Utc>,
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    execution_results: Option<serde_json::Value>,
    cancelled: bool,
}

/// Deserialized experiment row.
#[derive(Debug, Clone)]
pub struct ExperimentRecord {
    pub experiment_id: String,
    pub username: String,
    pub experiment_name: String,
    pub status: ExperimentStatus,
    pub experiment: Experiment,
    pub error: Option<String>,
    pub creation_time: chrono::DateTime<chrono::Utc>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub execution_results: Option<Vec<DeploymentExecutionResult>>,
    pub cancelled: bool,
}

impl From<ExperimentRow> for ExperimentRecord {
    fn from(row: ExperimentRow) -> Self {
        let experiment = serde_json::from_value(row.data).unwrap_or_default();
        let execution_results = row
            .execution_results
            .and_then(|v| serde_json::from_value(v).ok());

        ExperimentRecord {
            experiment_id: row.experiment_id,
            username: row.username,
            experiment_name: row.experiment_name,
            status: ExperimentStatus::from_str_or_unknown(&row.status),
            experiment,
            error: row.error,
            creation_time: row.creation_time,
            start_time: row.start_time,
            execution_results,
            cancelled: row.cancelled,
        }
    }
}
