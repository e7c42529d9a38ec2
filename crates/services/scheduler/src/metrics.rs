//! Typed metrics hooks.
//!
//! Emission transport is the embedder's concern; the scheduler reports
//! through this seam only.

use std::time::Duration;

use topology::TableReference;

/// Hooks invoked as repair work progresses.
///
/// Implementations must be `Send + Sync` for use across async tasks.
pub trait RepairMetrics: Send + Sync {
    /// One repair session ended.
    fn repair_session(&self, table: &TableReference, duration: Duration, successful: bool);

    /// One on-demand job reached a terminal state.
    fn repair_job_completed(&self, table: &TableReference, successful: bool);
}

/// No-op implementation for when metrics are disabled.
pub struct NoOpMetrics;

impl RepairMetrics for NoOpMetrics {
    fn repair_session(&self, _table: &TableReference, _duration: Duration, _successful: bool) {
        // No-op: metrics disabled
    }

    fn repair_job_completed(&self, _table: &TableReference, _successful: bool) {
        // No-op: metrics disabled
    }
}
