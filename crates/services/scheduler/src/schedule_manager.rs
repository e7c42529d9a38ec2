//! Generic job schedule manager.
//!
//! Owns the single execution worker that drives scheduled jobs. Each pass
//! visits jobs in registration order and runs one job at a time, task by
//! task, until the job defers (lock contention, failed session) or
//! completes. Backpressure lives here: a job's next task runs when the
//! manager gets back to it, never concurrently with its previous task.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use repair_db::JobId;
use tokio_util::task::AbortOnDropHandle;

/// The result of running one unit of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A task ran and more remain; the job may continue immediately.
    Progressed,
    /// No task could run right now; retry on the manager's next pass.
    Deferred,
    /// The job reached a terminal state and must leave the schedule.
    Completed,
}

/// A unit of schedulable work, executed one task at a time.
///
/// Implementations must be `Send + Sync`; the manager shares them with the
/// scheduler that registered them.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Identity of the job inside the manager.
    fn id(&self) -> JobId;

    /// Runs the job's next task.
    async fn run_next_task(&self) -> TaskOutcome;
}

type JobSlot = (JobId, Arc<dyn ScheduledJob>);

/// Drives registered jobs from a single background worker.
pub struct ScheduleManager {
    jobs: Arc<Mutex<Vec<JobSlot>>>,
    run_loop: AbortOnDropHandle<()>,
}

impl ScheduleManager {
    /// Creates a manager whose worker makes a pass over the scheduled jobs
    /// every `pass_interval`.
    #[must_use]
    pub fn new(pass_interval: Duration) -> Self {
        let jobs: Arc<Mutex<Vec<JobSlot>>> = Arc::new(Mutex::new(Vec::new()));
        let run_loop = AbortOnDropHandle::new(tokio::spawn(run_loop(jobs.clone(), pass_interval)));
        Self { jobs, run_loop }
    }

    /// Registers a job. A job already present under the same id is kept.
    pub fn schedule(&self, job: Arc<dyn ScheduledJob>) {
        let mut jobs = self.lock_jobs();
        let id = job.id();
        if jobs.iter().any(|(existing, _)| *existing == id) {
            tracing::debug!(job_id = %id, "job already scheduled, skipping");
            return;
        }
        tracing::debug!(job_id = %id, "job scheduled");
        jobs.push((id, job));
    }

    /// Removes a job from the schedule.
    ///
    /// An in-flight task of the job finishes on its own; it is simply never
    /// picked again.
    pub fn deschedule(&self, job_id: JobId) {
        let mut jobs = self.lock_jobs();
        let before = jobs.len();
        jobs.retain(|(id, _)| *id != job_id);
        if jobs.len() < before {
            tracing::debug!(%job_id, "job descheduled");
        }
    }

    /// The number of currently scheduled jobs.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.lock_jobs().len()
    }

    /// Stops the worker and forgets every scheduled job.
    pub fn close(&self) {
        self.run_loop.abort();
        self.lock_jobs().clear();
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, Vec<JobSlot>> {
        self.jobs.lock().expect("schedule manager lock poisoned")
    }
}

impl std::fmt::Debug for ScheduleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleManager")
            .field("scheduled_count", &self.scheduled_count())
            .finish_non_exhaustive()
    }
}

async fn run_loop(jobs: Arc<Mutex<Vec<JobSlot>>>, pass_interval: Duration) {
    let mut ticker = tokio::time::interval(pass_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        // Snapshot outside the per-task awaits so registration never blocks
        // on a running repair.
        let snapshot: Vec<JobSlot> = {
            let jobs = jobs.lock().expect("schedule manager lock poisoned");
            jobs.clone()
        };

        for (job_id, job) in snapshot {
            loop {
                match job.run_next_task().await {
                    TaskOutcome::Progressed => {}
                    TaskOutcome::Deferred => break,
                    TaskOutcome::Completed => {
                        let mut jobs = jobs.lock().expect("schedule manager lock poisoned");
                        jobs.retain(|(id, _)| *id != job_id);
                        break;
                    }
                }
            }
        }
    }
}
