//! Scheduler cadence and retention settings.

use std::time::Duration;

/// Scheduler cadence and retention settings.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SchedulerOptions {
    /// How often the scheduler sweeps the status store for persisted jobs,
    /// in seconds (default: 10).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How often the schedule manager makes a pass over scheduled jobs, in
    /// milliseconds (default: 1000).
    #[serde(default = "default_pass_interval_ms")]
    pub pass_interval_ms: u64,

    /// How long terminal job records are kept before they age out, in days
    /// (default: 30).
    #[serde(default = "default_job_retention_days")]
    pub job_retention_days: u64,
}

impl SchedulerOptions {
    /// The sweep interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// The schedule-manager pass interval as a [`Duration`].
    #[must_use]
    pub fn pass_interval(&self) -> Duration {
        Duration::from_millis(self.pass_interval_ms)
    }

    /// The terminal-record retention window as a [`Duration`].
    #[must_use]
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_days * 24 * 60 * 60)
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            pass_interval_ms: default_pass_interval_ms(),
            job_retention_days: default_job_retention_days(),
        }
    }
}

/// Serde default for [`SchedulerOptions::sweep_interval_secs`].
fn default_sweep_interval_secs() -> u64 {
    10
}

/// Serde default for [`SchedulerOptions::pass_interval_ms`].
fn default_pass_interval_ms() -> u64 {
    1000
}

/// Serde default for [`SchedulerOptions::job_retention_days`].
fn default_job_retention_days() -> u64 {
    30
}
