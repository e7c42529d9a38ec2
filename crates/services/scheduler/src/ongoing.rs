//! Lifecycle state of a single on-demand repair job.
//!
//! An [`OngoingJob`] mirrors one persisted job record in memory: the full
//! range set captured at creation, the subset repaired so far, and the
//! job's status. Every completion is written to the status store before
//! the mirror is updated, so the in-memory view never runs ahead of what a
//! restart would recover.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use repair_db::{JobId, JobStatus};
use topology::{NodeId, ReplicationState, TableReference, TokenMapHash, TokenRange};

use crate::{
    error::ScheduleJobError,
    store::{JobRecord, OnDemandStatusStore, StoreError},
};

/// The in-memory state machine of one on-demand repair job.
///
/// Status moves exactly once, from `started` to either `finished` or
/// `failed`; a terminal job never mutates again.
pub struct OngoingJob {
    job_id: JobId,
    host_id: NodeId,
    table: TableReference,
    token_map_hash: TokenMapHash,
    all_ranges: Vec<TokenRange>,
    cluster_wide: bool,
    started_at_ms: i64,
    store: Arc<dyn OnDemandStatusStore>,
    progress: Mutex<Progress>,
}

struct Progress {
    repaired: HashSet<TokenRange>,
    repaired_at_ms: HashMap<TokenRange, i64>,
    status: JobStatus,
    completed_at_ms: Option<i64>,
}

impl OngoingJob {
    /// Creates and persists a new job for `table`.
    ///
    /// The range set and token-map fingerprint are captured from the oracle
    /// at this moment and stay constant for the record's life. A
    /// cluster-wide job persists one record per participating host, all
    /// sharing the generated job id.
    pub(crate) async fn create(
        store: Arc<dyn OnDemandStatusStore>,
        oracle: &dyn ReplicationState,
        table: TableReference,
        cluster_wide: bool,
    ) -> Result<Self, ScheduleJobError> {
        let host_id = store.host_id();
        let all_ranges = oracle
            .token_ranges_for(&table, host_id)
            .ok_or(ScheduleJobError::TableNotFound)?;
        let token_map_hash = oracle
            .token_map_hash(&table)
            .ok_or(ScheduleJobError::TableNotFound)?;

        let job_id = JobId::random();
        if cluster_wide {
            let mut hosts = oracle.participating_hosts(&table);
            hosts.insert(host_id);
            store
                .add_cluster_wide_job(job_id, &table, token_map_hash, &hosts)
                .await
                .map_err(ScheduleJobError::Store)?;
        } else {
            store
                .add_new_job(job_id, &table, token_map_hash)
                .await
                .map_err(ScheduleJobError::Store)?;
        }

        Ok(Self {
            job_id,
            host_id,
            table,
            token_map_hash,
            all_ranges,
            cluster_wide,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            store,
            progress: Mutex::new(Progress {
                repaired: HashSet::new(),
                repaired_at_ms: HashMap::new(),
                status: JobStatus::Started,
                completed_at_ms: None,
            }),
        })
    }

    /// Rebuilds the in-memory state from a persisted record.
    ///
    /// The full range set is reconstructed from the oracle; ranges already
    /// recorded as repaired are never re-attempted. When the table has
    /// vanished from the schema the range set is empty and the job will be
    /// failed on its next ownership check.
    ///
    /// Panics when the record claims repaired ranges outside the host's
    /// current range set while the token map still matches; that record is
    /// corrupted and continuing would repair the wrong data.
    pub(crate) fn from_record(
        store: Arc<dyn OnDemandStatusStore>,
        oracle: &dyn ReplicationState,
        record: JobRecord,
    ) -> Self {
        let all_ranges = oracle
            .token_ranges_for(&record.table, record.host)
            .unwrap_or_default();

        let topology_matches = oracle.token_map_hash(&record.table) == Some(record.token_map_hash);
        if topology_matches {
            let known: HashSet<_> = all_ranges.iter().copied().collect();
            let stray = record
                .repaired_ranges
                .iter()
                .find(|range| !known.contains(range));
            if let Some(range) = stray {
                panic!(
                    "repair job {} for {} has repaired range {} outside its range set; \
                     refusing to continue with corrupted state",
                    record.job_id, record.table, range
                );
            }
        }

        let repaired: HashSet<_> = record.repaired_ranges.iter().copied().collect();
        // Best-known completion instant for ranges recovered from the store.
        let repaired_at_ms = record
            .repaired_ranges
            .iter()
            .map(|range| (*range, record.completed_at_ms.unwrap_or(record.started_at_ms)))
            .collect();

        Self {
            job_id: record.job_id,
            host_id: record.host,
            table: record.table,
            token_map_hash: record.token_map_hash,
            all_ranges,
            cluster_wide: record.cluster_wide,
            started_at_ms: record.started_at_ms,
            store,
            progress: Mutex::new(Progress {
                repaired,
                repaired_at_ms,
                status: record.status,
                completed_at_ms: record.completed_at_ms,
            }),
        }
    }

    /// The job id.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.job_id
    }

    /// The daemon that owns execution of this record.
    #[must_use]
    pub fn host_id(&self) -> NodeId {
        self.host_id
    }

    /// The table being repaired.
    #[must_use]
    pub fn table(&self) -> &TableReference {
        &self.table
    }

    /// Whether this record belongs to a cluster-wide request.
    #[must_use]
    pub fn is_cluster_wide(&self) -> bool {
        self.cluster_wide
    }

    /// When this record was created, in epoch milliseconds.
    #[must_use]
    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    /// When this record reached a terminal status, in epoch milliseconds.
    #[must_use]
    pub fn completed_at_ms(&self) -> Option<i64> {
        self.progress().completed_at_ms
    }

    /// The current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.progress().status
    }

    /// Whether the job can make no further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// The full range set captured at creation, in insertion order.
    #[must_use]
    pub fn all_ranges(&self) -> &[TokenRange] {
        &self.all_ranges
    }

    /// The ranges not yet repaired, in insertion order.
    #[must_use]
    pub fn remaining_ranges(&self) -> Vec<TokenRange> {
        let progress = self.progress();
        self.all_ranges
            .iter()
            .filter(|range| !progress.repaired.contains(range))
            .copied()
            .collect()
    }

    /// The first range not yet repaired, if any.
    #[must_use]
    pub fn next_remaining_range(&self) -> Option<TokenRange> {
        let progress = self.progress();
        self.all_ranges
            .iter()
            .find(|range| !progress.repaired.contains(range))
            .copied()
    }

    /// The fraction of ranges repaired, in `[0, 1]`.
    #[must_use]
    pub fn completed_ratio(&self) -> f64 {
        if self.all_ranges.is_empty() {
            return 1.0;
        }
        self.progress().repaired.len() as f64 / self.all_ranges.len() as f64
    }

    /// When `range` was observed repaired, in epoch milliseconds.
    #[must_use]
    pub fn range_repaired_at_ms(&self, range: TokenRange) -> Option<i64> {
        self.progress().repaired_at_ms.get(&range).copied()
    }

    /// Whether the live topology no longer matches the fingerprint captured
    /// at creation.
    ///
    /// A job that lost ownership must fail without executing further
    /// ranges; its record no longer describes ranges this host owns.
    #[must_use]
    pub fn has_lost_ownership(&self, oracle: &dyn ReplicationState) -> bool {
        oracle.token_map_hash(&self.table) != Some(self.token_map_hash)
    }

    /// Durably records `range` as repaired, then updates the mirror.
    ///
    /// The store write happens first; if it fails the range stays pending
    /// and will be retried, which is safe because range repair is
    /// idempotent.
    pub(crate) async fn mark_range_finished(&self, range: TokenRange) -> Result<(), StoreError> {
        self.store.finish_range(self.job_id, range).await?;

        let mut progress = self.progress();
        progress.repaired.insert(range);
        progress
            .repaired_at_ms
            .insert(range, chrono::Utc::now().timestamp_millis());
        Ok(())
    }

    /// Transitions the job to `finished`.
    ///
    /// Only legal once every range is repaired. Losing the status
    /// compare-and-set means another writer already finalized the record;
    /// the mirror adopts the winner's status and the job stays terminal.
    pub(crate) async fn finish(&self) -> Result<(), StoreError> {
        assert!(
            self.remaining_ranges().is_empty(),
            "finish requires every range repaired"
        );

        match self.store.finish(self.job_id).await {
            Ok(()) => {
                self.enter_terminal(JobStatus::Finished);
                Ok(())
            }
            Err(StoreError::Conflict { actual, .. }) if actual.is_terminal() => {
                tracing::info!(job_id = %self.job_id, status = %actual, "job already finalized");
                self.enter_terminal(actual);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Transitions the job to `failed`.
    pub(crate) async fn fail(&self) -> Result<(), StoreError> {
        match self.store.fail_job(self.job_id).await {
            Ok(()) => {
                self.enter_terminal(JobStatus::Failed);
                Ok(())
            }
            Err(StoreError::Conflict { actual, .. }) if actual.is_terminal() => {
                tracing::info!(job_id = %self.job_id, status = %actual, "job already finalized");
                self.enter_terminal(actual);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn enter_terminal(&self, status: JobStatus) {
        let mut progress = self.progress();
        if !progress.status.is_terminal() {
            progress.status = status;
            progress.completed_at_ms = Some(chrono::Utc::now().timestamp_millis());
        }
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().expect("job progress lock poisoned")
    }
}

impl std::fmt::Debug for OngoingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OngoingJob")
            .field("job_id", &self.job_id)
            .field("host_id", &self.host_id)
            .field("table", &self.table.to_string())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
