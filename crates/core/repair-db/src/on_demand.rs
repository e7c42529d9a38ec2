//! Persistent on-demand repair job records
//!
//! This module is the durable half of the on-demand status store: one row
//! per `(host_id, job_id)` with the table being repaired, the token-map
//! fingerprint captured at creation, and the set of ranges repaired so far.
//! Terminal status transitions are compare-and-set guarded so concurrent
//! daemons cannot both win a conflicting transition.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use topology::{NodeId, TableReference, TokenMapHash, TokenRange};
use uuid::Uuid;

mod job_id;
mod job_status;
pub(crate) mod sql;

pub use self::{job_id::JobId, job_status::JobStatus};
use crate::{Executor, error::Error};

/// Inserts a new job record in [`JobStatus::Started`] state with an empty
/// repaired-range set.
///
/// Fails if `(host_id, job_id)` already exists; detect that case with
/// [`Error::is_unique_violation`].
#[tracing::instrument(skip(exe), err)]
pub async fn add_job<'c, E>(
    exe: E,
    host_id: NodeId,
    job_id: JobId,
    table: &TableReference,
    token_map_hash: TokenMapHash,
    cluster_wide: bool,
) -> Result<(), Error>
where
    E: Executor<'c>,
{
    sql::insert(
        exe,
        host_id.as_uuid(),
        job_id,
        table.keyspace(),
        table.table(),
        table.id(),
        token_map_hash.as_i64(),
        JobStatus::Started,
        cluster_wide,
    )
    .await
    .map_err(Error::Database)
}

/// Durably adds one range to a job's repaired set.
///
/// Idempotent: re-adding an already-recorded range is a no-op. Rejected with
/// a state conflict once the job is terminal.
#[tracing::instrument(skip(exe), err)]
pub async fn finish_range<'c, E>(
    exe: E,
    host_id: NodeId,
    job_id: JobId,
    range: TokenRange,
) -> Result<(), JobStatusUpdateError>
where
    E: Executor<'c>,
{
    sql::finish_range(exe, host_id.as_uuid(), job_id, range).await
}

/// Transitions a job from `started` to `finished` and stamps `completed_at`.
///
/// The caller is responsible for only finishing jobs whose repaired set
/// covers every range; the store guards the status transition, not the
/// range-set precondition it cannot see.
#[tracing::instrument(skip(exe), err)]
pub async fn finish<'c, E>(exe: E, host_id: NodeId, job_id: JobId) -> Result<(), JobStatusUpdateError>
where
    E: Executor<'c>,
{
    sql::update_status_if_any_state(
        exe,
        host_id.as_uuid(),
        job_id,
        &[JobStatus::Started],
        JobStatus::Finished,
    )
    .await
}

/// Transitions a job from `started` to `failed` and stamps `completed_at`.
#[tracing::instrument(skip(exe), err)]
pub async fn fail<'c, E>(exe: E, host_id: NodeId, job_id: JobId) -> Result<(), JobStatusUpdateError>
where
    E: Executor<'c>,
{
    sql::update_status_if_any_state(
        exe,
        host_id.as_uuid(),
        job_id,
        &[JobStatus::Started],
        JobStatus::Failed,
    )
    .await
}

/// Returns a single job record.
#[tracing::instrument(skip(exe), err)]
pub async fn get_by_id<'c, E>(
    exe: E,
    host_id: NodeId,
    job_id: JobId,
) -> Result<Option<OnDemandJobRow>, Error>
where
    E: Executor<'c>,
{
    sql::get_by_id(exe, host_id.as_uuid(), job_id)
        .await
        .map_err(Error::Database)
}

/// Returns the non-terminal jobs owned by a host.
#[tracing::instrument(skip(exe), err)]
pub async fn get_ongoing_by_host<'c, E>(
    exe: E,
    host_id: NodeId,
) -> Result<Vec<OnDemandJobRow>, Error>
where
    E: Executor<'c>,
{
    sql::get_by_host_and_statuses(exe, host_id.as_uuid(), [JobStatus::Started])
        .await
        .map_err(Error::Database)
}

/// Returns every job owned by a host, regardless of status.
#[tracing::instrument(skip(exe), err)]
pub async fn get_all_by_host<'c, E>(exe: E, host_id: NodeId) -> Result<Vec<OnDemandJobRow>, Error>
where
    E: Executor<'c>,
{
    sql::get_by_host(exe, host_id.as_uuid())
        .await
        .map_err(Error::Database)
}

/// Returns every cluster-wide job record across all hosts.
#[tracing::instrument(skip(exe), err)]
pub async fn get_all_cluster_wide<'c, E>(exe: E) -> Result<Vec<OnDemandJobRow>, Error>
where
    E: Executor<'c>,
{
    sql::get_cluster_wide(exe).await.map_err(Error::Database)
}

/// Deletes terminal job records older than the retention window.
///
/// The record TTL of the original wide-column backing store is emulated
/// with an explicit filtered delete; the scheduler invokes this
/// opportunistically from its periodic sweep.
#[tracing::instrument(skip(exe), err)]
pub async fn purge_terminal_older_than<'c, E>(
    exe: E,
    retention: std::time::Duration,
) -> Result<u64, Error>
where
    E: Executor<'c>,
{
    sql::purge_terminal_older_than(exe, retention)
        .await
        .map_err(Error::Database)
}

/// Error type for guarded job status updates
#[derive(Debug, thiserror::Error)]
pub enum JobStatusUpdateError {
    #[error("Job not found")]
    NotFound,

    #[error("Job state conflict: expected one of {expected:?}, but found {actual}")]
    StateConflict {
        expected: Vec<JobStatus>,
        actual: JobStatus,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl JobStatusUpdateError {
    /// Returns `true` if the update failed on a transient connection issue
    /// and should be retried.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            )
        )
    }
}

/// A persisted on-demand repair job record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OnDemandJobRow {
    /// The daemon that owns execution of this record
    pub host_id: Uuid,

    /// Unique identifier of the job; shared across hosts for cluster-wide jobs
    pub job_id: JobId,

    /// Keyspace name of the repaired table
    pub keyspace_name: String,

    /// Table name of the repaired table
    pub table_name: String,

    /// Stable id of the repaired table
    pub table_id: Uuid,

    /// Fingerprint of the token map captured at job creation
    pub token_map_hash: i64,

    /// Ranges repaired so far
    pub repaired_ranges: Json<Vec<TokenRange>>,

    /// Current job status
    pub status: JobStatus,

    /// Whether this record belongs to a cluster-wide request
    pub cluster_wide: bool,

    /// When the record was created
    pub started_at: DateTime<Utc>,

    /// When the job reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl OnDemandJobRow {
    /// The owning host.
    #[must_use]
    pub fn host(&self) -> NodeId {
        NodeId::new(self.host_id)
    }

    /// The repaired table.
    #[must_use]
    pub fn table_reference(&self) -> TableReference {
        TableReference::new(&self.keyspace_name, &self.table_name, self.table_id)
    }

    /// The token-map fingerprint captured at creation.
    #[must_use]
    pub fn token_map_hash(&self) -> TokenMapHash {
        TokenMapHash::from_i64(self.token_map_hash)
    }

    /// The ranges repaired so far.
    #[must_use]
    pub fn repaired_ranges(&self) -> &[TokenRange] {
        &self.repaired_ranges.0
    }
}
