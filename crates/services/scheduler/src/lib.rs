//! On-demand repair scheduler for replicated wide-column clusters.
//!
//! This crate provides the user-initiated half of the repair daemon: it
//! accepts single-node and cluster-wide repair requests, persists each
//! request in the shared repair state database so it survives daemon
//! restarts and is visible to peer daemons, breaks requests into one task
//! per token range, and drives those tasks through a lease-protected
//! execution pipeline until every range is repaired or the job fails.
//!
//! The scheduler handles registration of jobs with the schedule manager,
//! periodically sweeps the status store to adopt jobs persisted by peers or
//! by a previous incarnation of this daemon, and converges every job to a
//! terminal outcome recorded in the store.

mod error;
mod history;
mod job;
mod lock;
mod metrics;
mod ongoing;
mod runner;
mod schedule_manager;
mod scheduler;
mod store;
mod views;

pub use self::{
    error::ScheduleJobError,
    history::{DbHistorySink, NoOpHistorySink, RepairHistorySink, RepairSessionOutcome},
    job::OnDemandRepairJob,
    lock::{DbLockFactory, DistributedLock, LockError, LockFactory},
    metrics::{NoOpMetrics, RepairMetrics},
    ongoing::OngoingJob,
    runner::{BoxError, RepairOutcome, RepairRunner},
    schedule_manager::{ScheduleManager, ScheduledJob, TaskOutcome},
    scheduler::{OnDemandRepairScheduler, SchedulerDependencies},
    store::{DbStatusStore, JobRecord, OnDemandStatusStore, StoreError},
    views::{OnDemandRepairJobView, VirtualNodeStateView},
};
