//! Lock Repository
//!
//! Node locks are full mutual exclusion: a `(node, connector)` pair is owned
//! by at most one experiment. Claiming is all-or-nothing inside a single
//! transaction; a partial claim never survives.

use sqlx::PgPool;

/// Outcome of an atomic multi-node claim.
#[derive(Debug)]
pub enum ClaimOutcome {
    Granted,
    /// The `(node_name, connector)` pairs already held by someone else.
    Conflicts(Vec<(String, String)>),
}

/// Claims every `(node_name, connector)` pair for an experiment, or none.
pub async fn claim_all(
    pool: &PgPool,
    username: &str,
    experiment_id: &str,
    pairs: &[(String, String)],
) -> Result<ClaimOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let mut conflicts = Vec::new();
    for (node_name, connector) in pairs {
        let holder: Option<String> = sqlx::query_scalar(
            "SELECT experiment_id FROM locks WHERE node_name = $1 AND connector = $2 FOR UPDATE",
        )
        .bind(node_name)
        .bind(connector)
        .fetch_optional(&mut *tx)
        .await?;

        match holder {
            Some(holder) if holder != experiment_id => {
                conflicts.push((node_name.clone(), connector.clone()));
            }
            Some(_) => {} // already ours, re-entrant claim
            None => {
                sqlx::query(
                    "INSERT INTO locks (node_name, connector, username, experiment_id) VALUES ($1, $2, $3, $4)",
                )
                .bind(node_name)
                .bind(connector)
                .bind(username)
                .bind(experiment_id)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    if conflicts.is_empty() {
        tx.commit().await?;
        Ok(ClaimOutcome::Granted)
    } else {
        tx.rollback().await?;
        Ok(ClaimOutcome::Conflicts(conflicts))
    }
}

/// Releases every lock held by an experiment. Idempotent.
pub async fn release_for_experiment(pool: &PgPool, experiment_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM locks WHERE experiment_id = $1")
        .bind(experiment_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
