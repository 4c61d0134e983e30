//! Flag Repository
//!
//! Every operation is a single SQL statement, so Postgres row locking
//! serializes concurrent updates on the same `(experiment_id, key)`.
//! Concurrent `set` against `increment` resolves to last-writer-wins for
//! the fields `set` touches.

use netunicorn_core::domain::flag::FlagValues;
use sqlx::PgPool;

pub async fn get(
    pool: &PgPool,
    experiment_id: &str,
    key: &str,
) -> Result<Option<FlagValues>, sqlx::Error> {
    let row: Option<(Option<String>, i64)> = sqlx::query_as(
        "SELECT text_value, int_value FROM flags WHERE experiment_id = $1 AND key = $2",
    )
    .bind(experiment_id)
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(text_value, int_value)| FlagValues {
        text_value,
        int_value: Some(int_value),
    }))
}

/// Overwrites both values atomically; a `None` field leaves the stored
/// value unchanged.
pub async fn set(
    pool: &PgPool,
    experiment_id: &str,
    key: &str,
    values: &FlagValues,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO flags (experiment_id, key, text_value, int_value)
        VALUES ($1, $2, $3, COALESCE($4, 0))
        ON CONFLICT (experiment_id, key) DO UPDATE SET
            text_value = COALESCE($3, flags.text_value),
            int_value = COALESCE($4, flags.int_value)
        "#,
    )
    .bind(experiment_id)
    .bind(key)
    .bind(&values.text_value)
    .bind(values.int_value)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn increment(pool: &PgPool, experiment_id: &str, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO flags (experiment_id, key, text_value, int_value)
        VALUES ($1, $2, NULL, 1)
        ON CONFLICT (experiment_id, key) DO UPDATE SET int_value = flags.int_value + 1
        "#,
    )
    .bind(experiment_id)
    .bind(key)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn decrement(pool: &PgPool, experiment_id: &str, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO flags (experiment_id, key, text_value, int_value)
        VALUES ($1, $2, NULL, -1)
        ON CONFLICT (experiment_id, key) DO UPDATE SET int_value = flags.int_value - 1
        "#,
    )
    .bind(experiment_id)
    .bind(key)
    .execute(pool)
    .await?;

    Ok(())
}
