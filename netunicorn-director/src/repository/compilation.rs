//! Compilation Repository
//!
//! Compilation rows are claimed by workers through a status-NULL →
//! 'running' compare-and-set, so multiple workers never build the same row.

use netunicorn_core::domain::environment::EnvironmentDefinition;
use sqlx::PgPool;

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILURE: &str = "failure";

/// A claimed compilation unit of work.
#[derive(Debug, Clone)]
pub struct CompilationJob {
    pub experiment_id: String,
    pub compilation_id: String,
    pub architecture: String,
    pub pipeline: Vec<u8>,
    pub environment_definition: EnvironmentDefinition,
}

/// Enqueues a compilation; rows are shared by fingerprint, so a duplicate
/// enqueue is a no-op.
pub async fn enqueue(
    pool: &PgPool,
    experiment_id: &str,
    compilation_id: &str,
    architecture: &str,
    pipeline: &[u8],
    environment_definition: &EnvironmentDefinition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO compilations
            (experiment_id, compilation_id, architecture, pipeline, environment_definition, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (experiment_id, compilation_id) DO NOTHING
        "#,
    )
    .bind(experiment_id)
    .bind(compilation_id)
    .bind(architecture)
    .bind(pipeline)
    .bind(serde_json::to_value(environment_definition).expect("environment serializes"))
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Records an already-settled compilation (environments that need no build).
pub async fn enqueue_settled(
    pool: &PgPool,
    experiment_id: &str,
    compilation_id: &str,
    architecture: &str,
    pipeline: &[u8],
    environment_definition: &EnvironmentDefinition,
    result: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO compilations
            (experiment_id, compilation_id, status, result, architecture, pipeline, environment_definition, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (experiment_id, compilation_id) DO NOTHING
        "#,
    )
    .bind(experiment_id)
    .bind(compilation_id)
    .bind(STATUS_SUCCESS)
    .bind(result)
    .bind(architecture)
    .bind(pipeline)
    .bind(serde_json::to_value(environment_definition).expect("environment serializes"))
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Claims the next pending compilation.
///
/// FIFO within an experiment; across experiments the most recently served
/// experiment is ordered behind the others, yielding round-robin fairness.
/// `SKIP LOCKED` lets concurrent workers claim disjoint rows.
pub async fn claim_next(
    pool: &PgPool,
    last_served_experiment: Option<&str>,
) -> Result<Option<CompilationJob>, sqlx::Error> {
    let row = sqlx::query_as::<_, CompilationRow>(
        r#"
        UPDATE compilations SET status = $1
        WHERE (experiment_id, compilation_id) IN (
            SELECT experiment_id, compilation_id
            FROM compilations
            WHERE status IS NULL
            ORDER BY (experiment_id = $2) ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING experiment_id, compilation_id, architecture, pipeline, environment_definition
        "#,
    )
    .bind(STATUS_RUNNING)
    .bind(last_served_experiment.unwrap_or(""))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

pub async fn record_result(
    pool: &PgPool,
    experiment_id: &str,
    compilation_id: &str,
    success: bool,
    log: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE compilations SET status = $1, result = $2 WHERE experiment_id = $3 AND compilation_id = $4",
    )
    .bind(if success { STATUS_SUCCESS } else { STATUS_FAILURE })
    .bind(log)
    .bind(experiment_id)
    .bind(compilation_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Compilation status snapshot for one experiment.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CompilationStatus {
    pub compilation_id: String,
    pub status: Option<String>,
    pub result: Option<String>,
}

impl CompilationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some(STATUS_SUCCESS) | Some(STATUS_FAILURE)
        )
    }

    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some(STATUS_SUCCESS)
    }
}

pub async fn statuses_for_experiment(
    pool: &PgPool,
    experiment_id: &str,
) -> Result<Vec<CompilationStatus>, sqlx::Error> {
    sqlx::query_as::<_, CompilationStatus>(
        "SELECT compilation_id, status, result FROM compilations WHERE experiment_id = $1",
    )
    .bind(experiment_id)
    .fetch_all(pool)
    .await
}

pub async fn delete_for_experiment(pool: &PgPool, experiment_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM compilations WHERE experiment_id = $1")
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct CompilationRow {
    experiment_id: String,
    compilation_id: String,
    architecture: String,
    pipeline: Vec<u8>,
    environment_definition: serde_json::Value,
}

impl From<CompilationRow> for CompilationJob {
    fn from(row: CompilationRow) -> Self {
        let environment_definition = serde_json::from_value(row.environment_definition)
            .unwrap_or_else(|_| EnvironmentDefinition::shell());

        CompilationJob {
            experiment_id: row.experiment_id,
            compilation_id: row.compilation_id,
            architecture: row.architecture,
            pipeline: row.pipeline,
            environment_definition,
        }
    }
}
