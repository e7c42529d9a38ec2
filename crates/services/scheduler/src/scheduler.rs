//! The on-demand repair scheduler facade.
//!
//! Accepts repair requests, keeps the in-memory map of jobs this daemon is
//! executing, and periodically sweeps the status store to adopt jobs
//! persisted by peer daemons or by a previous incarnation of this one.
//! The sweep is what makes restart recovery automatic and what distributes
//! cluster-wide jobs: each daemon finds its own records in the store and
//! schedules them.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use config::{RepairLockType, RepairOptions};
use repair_db::JobId;
use tokio_util::task::AbortOnDropHandle;
use topology::{ReplicationState, TableReference};

use crate::{
    error::ScheduleJobError,
    history::RepairHistorySink,
    job::OnDemandRepairJob,
    lock::LockFactory,
    metrics::RepairMetrics,
    ongoing::OngoingJob,
    runner::RepairRunner,
    schedule_manager::{ScheduleManager, ScheduledJob},
    store::{JobRecord, OnDemandStatusStore, StoreError},
    views::OnDemandRepairJobView,
};

/// Everything the scheduler needs, bound at construction.
///
/// All fields are required; partially-assembled schedulers cannot exist.
pub struct SchedulerDependencies {
    /// Durable record store shared by every daemon in the cluster.
    pub store: Arc<dyn OnDemandStatusStore>,
    /// Read-only replica placement oracle.
    pub oracle: Arc<dyn ReplicationState>,
    /// Drives repair sessions on the local database node.
    pub runner: Arc<dyn RepairRunner>,
    /// Cluster-scoped lock factory.
    pub locks: Arc<dyn LockFactory>,
    /// Metrics hooks.
    pub metrics: Arc<dyn RepairMetrics>,
    /// Repair history sink.
    pub history: Arc<dyn RepairHistorySink>,
    /// The schedule manager owning the execution worker.
    pub schedule_manager: Arc<ScheduleManager>,
    /// Options forwarded to every repair session.
    pub repair_options: RepairOptions,
    /// Lock granularity policy.
    pub lock_type: RepairLockType,
    /// How often the store is swept for persisted jobs.
    pub sweep_interval: Duration,
    /// How long terminal records are kept before aging out.
    pub job_retention: Duration,
}

/// The public entry point for user-initiated repairs.
///
/// Instantiated once per daemon; its lifecycle matches the daemon's.
pub struct OnDemandRepairScheduler {
    inner: Arc<Inner>,
    sweep: AbortOnDropHandle<()>,
}

struct Inner {
    jobs: Mutex<HashMap<JobId, Arc<OnDemandRepairJob>>>,
    store: Arc<dyn OnDemandStatusStore>,
    oracle: Arc<dyn ReplicationState>,
    runner: Arc<dyn RepairRunner>,
    locks: Arc<dyn LockFactory>,
    metrics: Arc<dyn RepairMetrics>,
    history: Arc<dyn RepairHistorySink>,
    schedule_manager: Arc<ScheduleManager>,
    repair_options: RepairOptions,
    lock_type: RepairLockType,
    job_retention: Duration,
}

impl OnDemandRepairScheduler {
    /// Creates the scheduler and starts its periodic store sweep.
    #[must_use]
    pub fn new(deps: SchedulerDependencies) -> Self {
        let inner = Arc::new(Inner {
            jobs: Mutex::new(HashMap::new()),
            store: deps.store,
            oracle: deps.oracle,
            runner: deps.runner,
            locks: deps.locks,
            metrics: deps.metrics,
            history: deps.history,
            schedule_manager: deps.schedule_manager,
            repair_options: deps.repair_options,
            lock_type: deps.lock_type,
            job_retention: deps.job_retention,
        });

        let sweep = {
            let inner = inner.clone();
            let sweep_interval = deps.sweep_interval;
            AbortOnDropHandle::new(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    inner.sweep().await;
                }
            }))
        };

        Self { inner, sweep }
    }

    /// Schedules a local on-demand repair of `table`.
    ///
    /// Persists the new job record, registers the job for execution, and
    /// returns its initial view.
    pub async fn schedule_job(
        &self,
        table: TableReference,
    ) -> Result<OnDemandRepairJobView, ScheduleJobError> {
        let ongoing = OngoingJob::create(
            self.inner.store.clone(),
            &*self.inner.oracle,
            table,
            false,
        )
        .await?;

        let job = self.inner.install_job(ongoing);
        Ok(job.view())
    }

    /// Schedules a cluster-wide on-demand repair of `table`.
    ///
    /// Persists one record per participating host under a single job id,
    /// registers the local facet for execution, and returns the cluster-wide
    /// views carrying that id as currently visible in the store. Peer
    /// daemons adopt their facets through their own sweeps.
    pub async fn schedule_cluster_wide_job(
        &self,
        table: TableReference,
    ) -> Result<Vec<OnDemandRepairJobView>, ScheduleJobError> {
        let ongoing =
            OngoingJob::create(self.inner.store.clone(), &*self.inner.oracle, table, true).await?;
        let job_id = ongoing.id();

        self.inner.install_job(ongoing);

        let views = self
            .get_all_cluster_wide_repair_jobs()
            .await
            .map_err(ScheduleJobError::Store)?;
        Ok(views.into_iter().filter(|view| view.id == job_id).collect())
    }

    /// Snapshots the jobs this daemon is currently executing.
    #[must_use]
    pub fn get_active_repair_jobs(&self) -> Vec<OnDemandRepairJobView> {
        let jobs: Vec<Arc<OnDemandRepairJob>> = {
            let jobs = self.inner.lock_jobs();
            jobs.values().cloned().collect()
        };
        jobs.iter().map(|job| job.view()).collect()
    }

    /// Reports every job owned by this daemon, any status, from the store.
    pub async fn get_all_repair_jobs(&self) -> Result<Vec<OnDemandRepairJobView>, StoreError> {
        let records = self.inner.store.get_all_jobs().await?;
        Ok(self.inner.record_views(records))
    }

    /// Reports every cluster-wide job across all hosts, from the store.
    pub async fn get_all_cluster_wide_repair_jobs(
        &self,
    ) -> Result<Vec<OnDemandRepairJobView>, StoreError> {
        let records = self.inner.store.get_all_cluster_wide_jobs().await?;
        Ok(self.inner.record_views(records))
    }

    /// Deschedules every in-memory job and stops the periodic sweep.
    ///
    /// In-flight repair sessions complete or fail on their own; their jobs
    /// are simply never picked again and will be re-adopted from the store
    /// by the next daemon incarnation.
    pub fn close(&self) {
        self.sweep.abort();

        let mut jobs = self.inner.lock_jobs();
        for job_id in jobs.keys().copied().collect::<Vec<_>>() {
            self.inner.schedule_manager.deschedule(job_id);
        }
        jobs.clear();
    }
}

impl Drop for OnDemandRepairScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    /// Builds the executable job, then atomically registers it in the
    /// in-memory map and the schedule manager.
    fn install_job(self: &Arc<Self>, ongoing: OngoingJob) -> Arc<OnDemandRepairJob> {
        let job = Arc::new(self.build_job(ongoing));

        let mut jobs = self.lock_jobs();
        jobs.insert(job.id(), job.clone());
        self.schedule_manager.schedule(job.clone());
        job
    }

    /// Adopts a persisted record not yet present in the in-memory map.
    fn schedule_ongoing_job(self: &Arc<Self>, record: JobRecord) {
        {
            let jobs = self.lock_jobs();
            if jobs.contains_key(&record.job_id) {
                return;
            }
        }

        let ongoing = OngoingJob::from_record(self.store.clone(), &*self.oracle, record);
        let job = Arc::new(self.build_job(ongoing));

        let mut jobs = self.lock_jobs();
        if jobs.contains_key(&job.id()) {
            return;
        }
        tracing::info!(job_id = %job.id(), "Scheduling ongoing job");
        jobs.insert(job.id(), job.clone());
        self.schedule_manager.schedule(job);
    }

    fn build_job(self: &Arc<Self>, ongoing: OngoingJob) -> OnDemandRepairJob {
        let on_finished = {
            let inner = Arc::downgrade(self);
            Arc::new(move |job_id: JobId| {
                if let Some(inner) = inner.upgrade() {
                    inner.remove_scheduled_job(job_id);
                }
            })
        };

        OnDemandRepairJob::new(
            ongoing,
            self.oracle.clone(),
            self.runner.clone(),
            self.locks.clone(),
            self.metrics.clone(),
            self.history.clone(),
            self.repair_options.clone(),
            self.lock_type,
            on_finished,
        )
    }

    /// Removes a terminal job from the in-memory map and the manager.
    fn remove_scheduled_job(&self, job_id: JobId) {
        let mut jobs = self.lock_jobs();
        jobs.remove(&job_id);
        self.schedule_manager.deschedule(job_id);
    }

    /// One periodic pass over the persisted job records.
    ///
    /// Transient store errors are absorbed; the next tick retries.
    async fn sweep(self: &Arc<Self>) {
        let records = match self.store.get_ongoing_jobs().await {
            Ok(records) => records,
            Err(err) => {
                tracing::info!(
                    error = %err,
                    error_source = monitoring::logging::error_source(&err),
                    "Failed to get ongoing on-demand jobs; automatic retry on next sweep"
                );
                return;
            }
        };

        for record in records {
            let current_hash = self.oracle.token_map_hash(&record.table);
            if current_hash != Some(record.token_map_hash) {
                self.fail_stale_job(&record).await;
                continue;
            }

            self.schedule_ongoing_job(record);
        }

        if let Err(err) = self.store.purge_terminal(self.job_retention).await {
            tracing::debug!(
                error = %err,
                error_source = monitoring::logging::error_source(&err),
                "failed to purge aged job records"
            );
        }
    }

    /// Fails a persisted job whose token map no longer matches the live
    /// topology, without dispatching any of its ranges.
    async fn fail_stale_job(&self, record: &JobRecord) {
        tracing::warn!(
            job_id = %record.job_id,
            table = %record.table,
            "token map changed since job creation; failing persisted job"
        );
        match self.store.fail_job(record.job_id).await {
            Ok(()) => {
                self.metrics.repair_job_completed(&record.table, false);
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(job_id = %record.job_id, "stale job already finalized");
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %record.job_id,
                    error = %err,
                    error_source = monitoring::logging::error_source(&err),
                    "failed to fail stale job; retrying on next sweep"
                );
            }
        }
    }

    fn record_views(&self, records: Vec<JobRecord>) -> Vec<OnDemandRepairJobView> {
        records
            .iter()
            .map(|record| OnDemandRepairJobView::from_record(record, &*self.oracle))
            .collect()
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Arc<OnDemandRepairJob>>> {
        self.jobs.lock().expect("scheduler job map lock poisoned")
    }
}
