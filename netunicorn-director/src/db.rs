use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Authentication verdicts: username, shared token, role bit, access tags
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS authentication (
            username VARCHAR(255) PRIMARY KEY,
            token TEXT NOT NULL,
            sudo BOOLEAN NOT NULL DEFAULT FALSE,
            access_tags TEXT[] NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Experiments: lifecycle status plus the full deployment map as JSONB
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS experiments (
            experiment_id VARCHAR(64) PRIMARY KEY,
            username VARCHAR(255) NOT NULL,
            experiment_name VARCHAR(255) NOT NULL,
            status VARCHAR(32) NOT NULL,
            data JSONB NOT NULL,
            error TEXT,
            creation_time TIMESTAMPTZ NOT NULL,
            start_time TIMESTAMPTZ,
            execution_results JSONB,
            cancelled BOOLEAN NOT NULL DEFAULT FALSE,
            cleaned BOOLEAN NOT NULL DEFAULT FALSE,
            UNIQUE (username, experiment_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Node locks: a node is owned by at most one experiment at a time
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS locks (
            node_name VARCHAR(255) NOT NULL,
            connector VARCHAR(255) NOT NULL,
            username VARCHAR(255) NOT NULL,
            experiment_id VARCHAR(64) NOT NULL,
            PRIMARY KEY (node_name, connector)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Compilations: shared by fingerprint across deployments of an experiment
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS compilations (
            experiment_id VARCHAR(64) NOT NULL,
            compilation_id VARCHAR(64) NOT NULL,
            status VARCHAR(16),
            result TEXT,
            architecture VARCHAR(32) NOT NULL,
            pipeline BYTEA NOT NULL,
            environment_definition JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (experiment_id, compilation_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Executor rows, created at experiment start and updated by the gateway
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executors (
            experiment_id VARCHAR(64) NOT NULL,
            executor_id VARCHAR(64) NOT NULL,
            node_name VARCHAR(255) NOT NULL,
            connector VARCHAR(255) NOT NULL,
            pipeline BYTEA NOT NULL,
            result BYTEA,
            keepalive_time TIMESTAMPTZ,
            error TEXT,
            finished BOOLEAN NOT NULL DEFAULT FALSE,
            state VARCHAR(32) NOT NULL DEFAULT 'LOADING',
            PRIMARY KEY (experiment_id, executor_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Flags: atomically updatable (text, int) pairs per experiment
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flags (
            experiment_id VARCHAR(64) NOT NULL,
            key VARCHAR(255) NOT NULL,
            text_value TEXT,
            int_value BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (experiment_id, key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // executor_id is globally unique; the gateway looks rows up without the
    // experiment id
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_executors_executor_id ON executors(executor_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_experiments_status ON experiments(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_compilations_pending ON compilations(created_at) WHERE status IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_locks_experiment ON locks(experiment_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
