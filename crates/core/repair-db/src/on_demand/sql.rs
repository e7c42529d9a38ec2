use std::time::Duration;

use sqlx::{Executor, Postgres, postgres::types::PgInterval, types::Json};
use topology::TokenRange;
use uuid::Uuid;

use super::{JobId, JobStatus, JobStatusUpdateError, OnDemandJobRow};

/// Inserts a new on-demand repair job record.
///
/// The record starts with an empty repaired-range set. Fails with a unique
/// violation if `(host_id, job_id)` already exists.
#[tracing::instrument(skip(exe), err)]
pub async fn insert<'c, E>(
    exe: E,
    host_id: Uuid,
    job_id: JobId,
    keyspace_name: &str,
    table_name: &str,
    table_id: Uuid,
    token_map_hash: i64,
    status: JobStatus,
    cluster_wide: bool,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        INSERT INTO repair_jobs (
            host_id, job_id, keyspace_name, table_name, table_id,
            token_map_hash, repaired_ranges, status, cluster_wide, started_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, '[]'::jsonb, $7, $8, timezone('UTC', now()))
    "#};
    sqlx::query(query)
        .bind(host_id)
        .bind(job_id)
        .bind(keyspace_name)
        .bind(table_name)
        .bind(table_id)
        .bind(token_map_hash)
        .bind(status)
        .bind(cluster_wide)
        .execute(exe)
        .await?;
    Ok(())
}

/// Internal structure to hold the result of a guarded update operation
#[derive(Debug, sqlx::FromRow)]
struct UpdateResult {
    updated_id: Option<JobId>,
    original_status: Option<JobStatus>,
}

impl UpdateResult {
    fn into_outcome(self, expected: &[JobStatus]) -> Result<(), JobStatusUpdateError> {
        match self {
            UpdateResult {
                updated_id: Some(_),
                ..
            } => Ok(()),
            UpdateResult {
                updated_id: None,
                original_status: Some(status),
            } => Err(JobStatusUpdateError::StateConflict {
                expected: expected.to_vec(),
                actual: status,
            }),
            _ => Err(JobStatusUpdateError::NotFound),
        }
    }
}

/// Adds one token range to a job's repaired set.
///
/// The append deduplicates, so re-adding an already-repaired range leaves
/// the row unchanged. Only legal while the job is still in the expected
/// (non-terminal) status; rows in any other state are left untouched and a
/// `StateConflict` is reported instead.
#[tracing::instrument(skip(exe), err)]
pub async fn finish_range<'c, E>(
    exe: E,
    host_id: Uuid,
    job_id: JobId,
    range: TokenRange,
) -> Result<(), JobStatusUpdateError>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        WITH target_job AS (
            SELECT job_id, status
            FROM repair_jobs
            WHERE host_id = $1 AND job_id = $2
        ),
        target_job_update AS (
            UPDATE repair_jobs
            SET repaired_ranges = (
                SELECT COALESCE(jsonb_agg(DISTINCT elem), '[]'::jsonb)
                FROM jsonb_array_elements(repair_jobs.repaired_ranges || $3) AS elem
            )
            WHERE host_id = $1 AND job_id = $2 AND status = $4
            RETURNING job_id
        )
        SELECT
            target_job_update.job_id AS updated_id,
            target_job.status AS original_status
        FROM target_job
        LEFT JOIN target_job_update ON target_job.job_id = target_job_update.job_id
    "#};

    let expected = [JobStatus::Started];
    let result: Option<UpdateResult> = sqlx::query_as(query)
        .bind(host_id)
        .bind(job_id)
        .bind(Json([range]))
        .bind(JobStatus::Started)
        .fetch_optional(exe)
        .await
        .map_err(JobStatusUpdateError::Database)?;

    result
        .ok_or(JobStatusUpdateError::NotFound)?
        .into_outcome(&expected)
}

/// Transitions a job to a new status, guarded by the expected original states.
///
/// Sets `completed_at` alongside the transition. If the job exists but its
/// current status is not among `expected_statuses`, returns
/// `JobStatusUpdateError::StateConflict` and leaves the row untouched.
#[tracing::instrument(skip(exe), err)]
pub async fn update_status_if_any_state<'c, E>(
    exe: E,
    host_id: Uuid,
    job_id: JobId,
    expected_statuses: &[JobStatus],
    new_status: JobStatus,
) -> Result<(), JobStatusUpdateError>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        WITH target_job AS (
            SELECT job_id, status
            FROM repair_jobs
            WHERE host_id = $1 AND job_id = $2
        ),
        target_job_update AS (
            UPDATE repair_jobs
            SET status = $4, completed_at = timezone('UTC', now())
            WHERE host_id = $1 AND job_id = $2 AND status = ANY($3)
            RETURNING job_id
        )
        SELECT
            target_job_update.job_id AS updated_id,
            target_job.status AS original_status
        FROM target_job
        LEFT JOIN target_job_update ON target_job.job_id = target_job_update.job_id
    "#};

    let result: Option<UpdateResult> = sqlx::query_as(query)
        .bind(host_id)
        .bind(job_id)
        .bind(expected_statuses)
        .bind(new_status)
        .fetch_optional(exe)
        .await
        .map_err(JobStatusUpdateError::Database)?;

    result
        .ok_or(JobStatusUpdateError::NotFound)?
        .into_outcome(expected_statuses)
}

/// Returns a single job record.
#[tracing::instrument(skip(exe), err)]
pub async fn get_by_id<'c, E>(
    exe: E,
    host_id: Uuid,
    job_id: JobId,
) -> Result<Option<OnDemandJobRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT host_id, job_id, keyspace_name, table_name, table_id,
               token_map_hash, repaired_ranges, status, cluster_wide,
               started_at, completed_at
        FROM repair_jobs
        WHERE host_id = $1 AND job_id = $2
    "#};
    sqlx::query_as(query)
        .bind(host_id)
        .bind(job_id)
        .fetch_optional(exe)
        .await
}

/// Returns the jobs owned by a host with any of the specified statuses.
#[tracing::instrument(skip(exe), err)]
pub async fn get_by_host_and_statuses<'c, E, const N: usize>(
    exe: E,
    host_id: Uuid,
    statuses: [JobStatus; N],
) -> Result<Vec<OnDemandJobRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT host_id, job_id, keyspace_name, table_name, table_id,
               token_map_hash, repaired_ranges, status, cluster_wide,
               started_at, completed_at
        FROM repair_jobs
        WHERE host_id = $1 AND status = ANY($2)
        ORDER BY started_at ASC, job_id ASC
    "#};
    sqlx::query_as(query)
        .bind(host_id)
        .bind(statuses)
        .fetch_all(exe)
        .await
}

/// Returns every job owned by a host, regardless of status.
#[tracing::instrument(skip(exe), err)]
pub async fn get_by_host<'c, E>(exe: E, host_id: Uuid) -> Result<Vec<OnDemandJobRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT host_id, job_id, keyspace_name, table_name, table_id,
               token_map_hash, repaired_ranges, status, cluster_wide,
               started_at, completed_at
        FROM repair_jobs
        WHERE host_id = $1
        ORDER BY started_at ASC, job_id ASC
    "#};
    sqlx::query_as(query).bind(host_id).fetch_all(exe).await
}

/// Returns every cluster-wide job record across all hosts.
#[tracing::instrument(skip(exe), err)]
pub async fn get_cluster_wide<'c, E>(exe: E) -> Result<Vec<OnDemandJobRow>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT host_id, job_id, keyspace_name, table_name, table_id,
               token_map_hash, repaired_ranges, status, cluster_wide,
               started_at, completed_at
        FROM repair_jobs
        WHERE cluster_wide
        ORDER BY started_at ASC, job_id ASC, host_id ASC
    "#};
    sqlx::query_as(query).fetch_all(exe).await
}

/// Deletes terminal job records older than the retention window.
///
/// Returns the number of purged records.
#[tracing::instrument(skip(exe), err)]
pub async fn purge_terminal_older_than<'c, E>(
    exe: E,
    retention: Duration,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let interval = PgInterval {
        microseconds: retention.as_micros() as i64,
        ..Default::default()
    };

    let query = indoc::indoc! {r#"
        DELETE FROM repair_jobs
        WHERE status = ANY($1)
              AND completed_at IS NOT NULL
              AND completed_at < timezone('UTC', now()) - $2
    "#};

    let result = sqlx::query(query)
        .bind([JobStatus::Finished, JobStatus::Failed])
        .bind(interval)
        .execute(exe)
        .await?;

    Ok(result.rows_affected())
}
