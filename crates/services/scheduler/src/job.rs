//! A schedulable on-demand repair job.
//!
//! Wraps one [`OngoingJob`] and executes it as a sequence of per-range
//! tasks: re-check ownership, take the distributed lock, drive the repair
//! action, durably record the completion, release. Contended locks and
//! failed sessions defer the task; the schedule manager retries on its
//! next pass.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use config::{RepairLockType, RepairOptions};
use repair_db::JobId;
use tokio::time::Instant;
use topology::{ReplicationState, TokenRange};

use crate::{
    history::{RepairHistorySink, RepairSessionOutcome},
    lock::{DistributedLock, LockFactory},
    metrics::RepairMetrics,
    ongoing::OngoingJob,
    runner::{RepairOutcome, RepairRunner},
    schedule_manager::{ScheduledJob, TaskOutcome},
    views::OnDemandRepairJobView,
};

/// Hook invoked exactly once when a job reaches a terminal state.
pub(crate) type OnFinished = Arc<dyn Fn(JobId) + Send + Sync>;

/// One user-initiated repair request being executed by this daemon.
pub struct OnDemandRepairJob {
    ongoing: OngoingJob,
    oracle: Arc<dyn ReplicationState>,
    runner: Arc<dyn RepairRunner>,
    locks: Arc<dyn LockFactory>,
    metrics: Arc<dyn RepairMetrics>,
    history: Arc<dyn RepairHistorySink>,
    repair_options: RepairOptions,
    lock_type: RepairLockType,
    on_finished: OnFinished,
    finished_notified: AtomicBool,
}

impl OnDemandRepairJob {
    #[expect(clippy::too_many_arguments)]
    pub(crate) fn new(
        ongoing: OngoingJob,
        oracle: Arc<dyn ReplicationState>,
        runner: Arc<dyn RepairRunner>,
        locks: Arc<dyn LockFactory>,
        metrics: Arc<dyn RepairMetrics>,
        history: Arc<dyn RepairHistorySink>,
        repair_options: RepairOptions,
        lock_type: RepairLockType,
        on_finished: OnFinished,
    ) -> Self {
        Self {
            ongoing,
            oracle,
            runner,
            locks,
            metrics,
            history,
            repair_options,
            lock_type,
            on_finished,
            finished_notified: AtomicBool::new(false),
        }
    }

    /// The wrapped job state.
    #[must_use]
    pub fn ongoing(&self) -> &OngoingJob {
        &self.ongoing
    }

    /// Snapshots the job for reporting.
    #[must_use]
    pub fn view(&self) -> OnDemandRepairJobView {
        OnDemandRepairJobView::from_ongoing(&self.ongoing, &*self.oracle)
    }

    /// The lock resources one range task must hold before repairing.
    ///
    /// `vnode` policy locks the range itself; `datacenter` policy locks the
    /// table once per replicating datacenter. Resources are returned in a
    /// stable order so concurrent multi-lock acquisition cannot deadlock.
    fn lock_resources(&self, range: TokenRange) -> Vec<String> {
        let table = self.ongoing.table();
        match self.lock_type {
            RepairLockType::Vnode => {
                vec![format!(
                    "repair/{}/{}/{}:{}",
                    table.keyspace(),
                    table.table(),
                    range.start(),
                    range.end(),
                )]
            }
            RepairLockType::Datacenter => self
                .oracle
                .datacenters_for(table)
                .into_iter()
                .map(|dc| format!("repair/{}/{}/{}", dc, table.keyspace(), table.table()))
                .collect(),
        }
    }

    async fn acquire_locks(&self, range: TokenRange) -> Option<Vec<Box<dyn DistributedLock>>> {
        let mut guards = Vec::new();
        for resource in self.lock_resources(range) {
            match self.locks.try_lock(&resource).await {
                Ok(Some(guard)) => guards.push(guard),
                Ok(None) => {
                    tracing::debug!(
                        job_id = %self.ongoing.id(),
                        resource,
                        "repair lock contended; deferring task"
                    );
                    release_locks(guards).await;
                    return None;
                }
                Err(err) => {
                    tracing::warn!(
                        job_id = %self.ongoing.id(),
                        resource,
                        error = %err,
                        error_source = monitoring::logging::error_source(&err),
                        "repair lock acquisition failed; deferring task"
                    );
                    release_locks(guards).await;
                    return None;
                }
            }
        }
        Some(guards)
    }

    /// Executes the repair action for one range and records the outcome.
    async fn repair_range(&self, range: TokenRange) -> TaskOutcome {
        let table = self.ongoing.table().clone();
        let replicas = self.oracle.replicas_for(&table, range);
        let session = self
            .history
            .session_started(self.ongoing.host_id(), &table, range)
            .await;

        let started = Instant::now();
        let outcome = self
            .runner
            .repair(&table, range, &replicas, &self.repair_options)
            .await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(RepairOutcome::Success | RepairOutcome::Skipped) => {
                let session_outcome = match outcome {
                    Ok(RepairOutcome::Skipped) => RepairSessionOutcome::Skipped,
                    _ => RepairSessionOutcome::Success,
                };
                match self.ongoing.mark_range_finished(range).await {
                    Ok(()) => {
                        self.metrics.repair_session(&table, elapsed, true);
                        if let Some(session) = session {
                            self.history.session_closed(session, session_outcome).await;
                        }
                        tracing::debug!(job_id = %self.ongoing.id(), %table, %range, "range repaired");
                        TaskOutcome::Progressed
                    }
                    Err(err) => {
                        // The repair itself succeeded; an unrecorded range
                        // stays pending and the retry is idempotent.
                        self.metrics.repair_session(&table, elapsed, true);
                        if let Some(session) = session {
                            self.history.session_closed(session, session_outcome).await;
                        }
                        tracing::warn!(
                            job_id = %self.ongoing.id(), %table, %range,
                            error = %err,
                            error_source = monitoring::logging::error_source(&err),
                            "range repaired but completion not recorded; will retry"
                        );
                        TaskOutcome::Deferred
                    }
                }
            }
            Ok(RepairOutcome::Failed) => {
                self.metrics.repair_session(&table, elapsed, false);
                if let Some(session) = session {
                    self.history
                        .session_closed(session, RepairSessionOutcome::Failed)
                        .await;
                }
                tracing::warn!(
                    job_id = %self.ongoing.id(), %table, %range,
                    "repair session failed; range stays pending"
                );
                TaskOutcome::Deferred
            }
            Err(err) => {
                self.metrics.repair_session(&table, elapsed, false);
                if let Some(session) = session {
                    self.history
                        .session_closed(session, RepairSessionOutcome::Failed)
                        .await;
                }
                tracing::warn!(
                    job_id = %self.ongoing.id(), %table, %range,
                    error = %err, error_source = monitoring::logging::error_source(&*err),
                    "repair session errored; range stays pending"
                );
                TaskOutcome::Deferred
            }
        }
    }

    /// Fails the job after the token map changed underneath it.
    async fn fail_for_lost_ownership(&self) -> TaskOutcome {
        tracing::warn!(
            job_id = %self.ongoing.id(),
            table = %self.ongoing.table(),
            "token map changed since job creation; failing job"
        );
        match self.ongoing.fail().await {
            Ok(()) => {
                self.metrics
                    .repair_job_completed(self.ongoing.table(), false);
                self.notify_finished();
                TaskOutcome::Completed
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %self.ongoing.id(),
                    error = %err, error_source = monitoring::logging::error_source(&err),
                    "failed to persist job failure; retrying on next pass"
                );
                TaskOutcome::Deferred
            }
        }
    }

    /// Finalizes a job whose remaining range set has drained.
    async fn finalize(&self) -> TaskOutcome {
        match self.ongoing.finish().await {
            Ok(()) => {
                tracing::info!(
                    job_id = %self.ongoing.id(),
                    table = %self.ongoing.table(),
                    "on-demand repair job finished"
                );
                self.metrics
                    .repair_job_completed(self.ongoing.table(), true);
                self.notify_finished();
                TaskOutcome::Completed
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %self.ongoing.id(),
                    error = %err, error_source = monitoring::logging::error_source(&err),
                    "failed to persist job completion; retrying on next pass"
                );
                TaskOutcome::Deferred
            }
        }
    }

    fn notify_finished(&self) {
        if !self.finished_notified.swap(true, Ordering::SeqCst) {
            (self.on_finished)(self.ongoing.id());
        }
    }
}

#[async_trait]
impl ScheduledJob for OnDemandRepairJob {
    fn id(&self) -> JobId {
        self.ongoing.id()
    }

    async fn run_next_task(&self) -> TaskOutcome {
        if self.ongoing.is_terminal() {
            self.notify_finished();
            return TaskOutcome::Completed;
        }

        if self.ongoing.has_lost_ownership(&*self.oracle) {
            return self.fail_for_lost_ownership().await;
        }

        let Some(range) = self.ongoing.next_remaining_range() else {
            return self.finalize().await;
        };

        let Some(guards) = self.acquire_locks(range).await else {
            return TaskOutcome::Deferred;
        };

        let outcome = self.repair_range(range).await;
        release_locks(guards).await;

        match outcome {
            TaskOutcome::Progressed if self.ongoing.remaining_ranges().is_empty() => {
                self.finalize().await
            }
            outcome => outcome,
        }
    }
}

impl std::fmt::Debug for OnDemandRepairJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandRepairJob")
            .field("ongoing", &self.ongoing)
            .finish_non_exhaustive()
    }
}

async fn release_locks(guards: Vec<Box<dyn DistributedLock>>) {
    for guard in guards {
        guard.release().await;
    }
}
