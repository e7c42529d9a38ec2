//! Repair execution options.

use std::time::Duration;

/// How repair sessions are parallelized across replicas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairParallelism {
    /// Repair all replicas of a range at once.
    #[default]
    Parallel,
    /// Repair one replica at a time.
    Sequential,
    /// Repair one datacenter at a time, replicas within it in parallel.
    DatacenterAware,
}

impl RepairParallelism {
    /// Convert the [`RepairParallelism`] to a string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
            Self::DatacenterAware => "datacenter_aware",
        }
    }
}

impl std::fmt::Display for RepairParallelism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which repair flavor to request from the database node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairType {
    /// Full repair of one virtual-node range at a time.
    #[default]
    Vnode,
    /// Incremental repair over unrepaired data only.
    Incremental,
}

impl RepairType {
    /// Convert the [`RepairType`] to a string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vnode => "vnode",
            Self::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for RepairType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options forwarded to the repair runner for every repair session.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RepairOptions {
    /// Replica parallelism of each session (default: parallel).
    #[serde(default)]
    pub parallelism: RepairParallelism,

    /// Repair flavor (default: vnode).
    #[serde(default)]
    pub repair_type: RepairType,

    /// Run validation only, without streaming differences (default: false).
    #[serde(default)]
    pub validate: bool,

    /// Session priority hint forwarded to the database node (default: 0).
    #[serde(default)]
    pub priority: i32,

    /// Per-session timeout in seconds (default: 1800).
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

impl RepairOptions {
    /// The per-session timeout as a [`Duration`].
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            parallelism: RepairParallelism::default(),
            repair_type: RepairType::default(),
            validate: false,
            priority: 0,
            session_timeout_secs: default_session_timeout_secs(),
        }
    }
}

/// Serde default for [`RepairOptions::session_timeout_secs`].
fn default_session_timeout_secs() -> u64 {
    1800
}
