//! On-demand status store seam.
//!
//! The store is the single source of truth for cross-daemon coordination:
//! every accepted repair request lives in it as one record per owning host.
//! The scheduler interacts with the store exclusively through this
//! abstraction; the backing schema never leaks into the core.

use std::{collections::BTreeSet, time::Duration};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use repair_db::{JobId, JobStatus, JobStatusUpdateError, OnDemandJobRow, RepairDb, on_demand};
use topology::{NodeId, TableReference, TokenMapHash, TokenRange};

/// Errors surfaced by the on-demand status store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `(host, job)` record already exists.
    #[error("job record already exists")]
    AlreadyExists,

    /// The referenced job record does not exist.
    #[error("job record not found")]
    NotFound,

    /// The record exists but is in a state that rejects the update; another
    /// daemon won a conflicting terminal transition.
    #[error("job status conflict: expected one of {expected:?}, but found {actual}")]
    Conflict {
        expected: Vec<JobStatus>,
        actual: JobStatus,
    },

    /// The store backend failed; the operation may be retried.
    #[error("repair state database error: {0}")]
    Database(#[source] repair_db::Error),
}

impl StoreError {
    /// Whether the update lost a compare-and-set race rather than failing.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<JobStatusUpdateError> for StoreError {
    fn from(err: JobStatusUpdateError) -> Self {
        match err {
            JobStatusUpdateError::NotFound => Self::NotFound,
            JobStatusUpdateError::StateConflict { expected, actual } => {
                Self::Conflict { expected, actual }
            }
            JobStatusUpdateError::Database(err) => {
                Self::Database(repair_db::Error::Database(err))
            }
        }
    }
}

/// A store-level snapshot of one persisted job record.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// The daemon that owns execution of this record.
    pub host: NodeId,
    /// Unique identifier of the job; shared across hosts for cluster-wide jobs.
    pub job_id: JobId,
    /// The repaired table.
    pub table: TableReference,
    /// Fingerprint of the token map captured at job creation.
    pub token_map_hash: TokenMapHash,
    /// Ranges repaired so far.
    pub repaired_ranges: Vec<TokenRange>,
    /// Current job status.
    pub status: JobStatus,
    /// Whether this record belongs to a cluster-wide request.
    pub cluster_wide: bool,
    /// When the record was created, in epoch milliseconds.
    pub started_at_ms: i64,
    /// When the job reached a terminal status, in epoch milliseconds.
    pub completed_at_ms: Option<i64>,
}

impl From<OnDemandJobRow> for JobRecord {
    fn from(row: OnDemandJobRow) -> Self {
        Self {
            host: row.host(),
            job_id: row.job_id,
            table: row.table_reference(),
            token_map_hash: row.token_map_hash(),
            repaired_ranges: row.repaired_ranges().to_vec(),
            status: row.status,
            cluster_wide: row.cluster_wide,
            started_at_ms: row.started_at.timestamp_millis(),
            completed_at_ms: row.completed_at.map(|at| at.timestamp_millis()),
        }
    }
}

/// Durable record store for on-demand repair jobs.
///
/// Implementations must linearize per-record updates; terminal status
/// transitions are compare-and-set so two daemons can never both win.
#[async_trait]
pub trait OnDemandStatusStore: Send + Sync {
    /// The identity of this daemon's node.
    fn host_id(&self) -> NodeId;

    /// Atomically inserts a local job record in `started` state with an
    /// empty repaired-range set.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if `(host, job)` exists.
    async fn add_new_job(
        &self,
        job_id: JobId,
        table: &TableReference,
        token_map_hash: TokenMapHash,
    ) -> Result<(), StoreError>;

    /// Atomically inserts one cluster-wide record per participating host,
    /// all under the same `job_id`. All records are created, or none.
    async fn add_cluster_wide_job(
        &self,
        job_id: JobId,
        table: &TableReference,
        token_map_hash: TokenMapHash,
        hosts: &BTreeSet<NodeId>,
    ) -> Result<(), StoreError>;

    /// Durably adds one range to a local job's repaired set. Idempotent.
    ///
    /// The range counts as repaired only once this returns `Ok`.
    async fn finish_range(&self, job_id: JobId, range: TokenRange) -> Result<(), StoreError>;

    /// Transitions a local job to `finished` and stamps its completion time.
    ///
    /// Callers only invoke this once every range of the job is repaired.
    async fn finish(&self, job_id: JobId) -> Result<(), StoreError>;

    /// Transitions a local job to `failed` and stamps its completion time.
    async fn fail_job(&self, job_id: JobId) -> Result<(), StoreError>;

    /// The non-terminal records owned by this host.
    async fn get_ongoing_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Every record owned by this host, regardless of status.
    async fn get_all_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Every cluster-wide record across all hosts.
    async fn get_all_cluster_wide_jobs(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Ages out terminal records older than the retention window.
    async fn purge_terminal(&self, retention: Duration) -> Result<u64, StoreError>;
}

/// Status store backed by the repair state database.
///
/// All operations include automatic retry logic on connection errors.
#[derive(Clone, Debug)]
pub struct DbStatusStore {
    db: RepairDb,
    host_id: NodeId,
}

impl DbStatusStore {
    /// Creates a store owned by the daemon on `host_id`.
    #[must_use]
    pub fn new(db: RepairDb, host_id: NodeId) -> Self {
        Self { db, host_id }
    }
}

#[async_trait]
impl OnDemandStatusStore for DbStatusStore {
    fn host_id(&self) -> NodeId {
        self.host_id
    }

    async fn add_new_job(
        &self,
        job_id: JobId,
        table: &TableReference,
        token_map_hash: TokenMapHash,
    ) -> Result<(), StoreError> {
        let result = (|| {
            on_demand::add_job(&self.db, self.host_id, job_id, table, token_map_hash, false)
        })
        .retry(with_policy())
        .when(repair_db::Error::is_connection_error)
        .notify(|err, dur| retry_notify("adding job record", err, dur))
        .await;

        result.map_err(|err| {
            if err.is_unique_violation() {
                StoreError::AlreadyExists
            } else {
                StoreError::Database(err)
            }
        })
    }

    async fn add_cluster_wide_job(
        &self,
        job_id: JobId,
        table: &TableReference,
        token_map_hash: TokenMapHash,
        hosts: &BTreeSet<NodeId>,
    ) -> Result<(), StoreError> {
        let result = (|| async {
            let mut txn = self.db.begin_txn().await?;
            for host in hosts {
                on_demand::add_job(&mut txn, *host, job_id, table, token_map_hash, true).await?;
            }
            txn.commit().await
        })
        .retry(with_policy())
        .when(repair_db::Error::is_connection_error)
        .notify(|err, dur| retry_notify("adding cluster-wide job records", err, dur))
        .await;

        result.map_err(|err| {
            if err.is_unique_violation() {
                StoreError::AlreadyExists
            } else {
                StoreError::Database(err)
            }
        })
    }

    async fn finish_range(&self, job_id: JobId, range: TokenRange) -> Result<(), StoreError> {
        (|| on_demand::finish_range(&self.db, self.host_id, job_id, range))
            .retry(with_policy())
            .when(JobStatusUpdateError::is_connection_error)
            .notify(|err, dur| update_retry_notify("recording repaired range", err, dur))
            .await
            .map_err(StoreError::from)
    }

    async fn finish(&self, job_id: JobId) -> Result<(), StoreError> {
        (|| on_demand::finish(&self.db, self.host_id, job_id))
            .retry(with_policy())
            .when(JobStatusUpdateError::is_connection_error)
            .notify(|err, dur| update_retry_notify("finishing job", err, dur))
            .await
            .map_err(StoreError::from)
    }

    async fn fail_job(&self, job_id: JobId) -> Result<(), StoreError> {
        (|| on_demand::fail(&self.db, self.host_id, job_id))
            .retry(with_policy())
            .when(JobStatusUpdateError::is_connection_error)
            .notify(|err, dur| update_retry_notify("failing job", err, dur))
            .await
            .map_err(StoreError::from)
    }

    async fn get_ongoing_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = (|| on_demand::get_ongoing_by_host(&self.db, self.host_id))
            .retry(with_policy())
            .when(repair_db::Error::is_connection_error)
            .notify(|err, dur| retry_notify("getting ongoing jobs", err, dur))
            .await
            .map_err(StoreError::Database)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_all_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = (|| on_demand::get_all_by_host(&self.db, self.host_id))
            .retry(with_policy())
            .when(repair_db::Error::is_connection_error)
            .notify(|err, dur| retry_notify("getting all jobs", err, dur))
            .await
            .map_err(StoreError::Database)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_all_cluster_wide_jobs(&self) -> Result<Vec<JobRecord>, StoreError> {
        let rows = (|| on_demand::get_all_cluster_wide(&self.db))
            .retry(with_policy())
            .when(repair_db::Error::is_connection_error)
            .notify(|err, dur| retry_notify("getting cluster-wide jobs", err, dur))
            .await
            .map_err(StoreError::Database)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn purge_terminal(&self, retention: Duration) -> Result<u64, StoreError> {
        on_demand::purge_terminal_older_than(&self.db, retention)
            .await
            .map_err(StoreError::Database)
    }
}

fn retry_notify(operation: &str, err: &repair_db::Error, dur: Duration) {
    tracing::warn!(
        error = %err, error_source = monitoring::logging::error_source(err),
        "Connection error while {operation}. Retrying in {:.1}s",
        dur.as_secs_f32()
    );
}

fn update_retry_notify(operation: &str, err: &JobStatusUpdateError, dur: Duration) {
    tracing::warn!(
        error = %err, error_source = monitoring::logging::error_source(err),
        "Connection error while {operation}. Retrying in {:.1}s",
        dur.as_secs_f32()
    );
}

/// A retry policy for the status store operations.
///
/// The retry policy is an exponential backoff with:
/// - jitter: false
/// - factor: 2
/// - `min_delay`: 1s
/// - `max_delay`: 60s
/// - `max_times`: 3
#[inline]
fn with_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
}
