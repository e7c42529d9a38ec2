//! Distributed lock settings.

use std::time::Duration;

/// What a single distributed repair lock covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairLockType {
    /// One lock per token range of a table.
    #[default]
    Vnode,
    /// One lock per datacenter per table.
    Datacenter,
}

impl RepairLockType {
    /// Convert the [`RepairLockType`] to a string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vnode => "vnode",
            Self::Datacenter => "datacenter",
        }
    }
}

impl std::fmt::Display for RepairLockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distributed lock settings.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LockOptions {
    /// Lock granularity policy (default: vnode).
    #[serde(default)]
    pub lock_type: RepairLockType,

    /// How long an acquired lease is valid without renewal, in seconds
    /// (default: 300).
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// How often a held lease is renewed, in seconds (default: 60).
    ///
    /// Must be well below the lease duration so a healthy holder never
    /// loses its lease between renewals.
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
}

impl LockOptions {
    /// The lease duration as a [`Duration`].
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    /// The renewal interval as a [`Duration`].
    #[must_use]
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lock_type: RepairLockType::default(),
            lease_duration_secs: default_lease_duration_secs(),
            renewal_interval_secs: default_renewal_interval_secs(),
        }
    }
}

/// Serde default for [`LockOptions::lease_duration_secs`].
fn default_lease_duration_secs() -> u64 {
    300
}

/// Serde default for [`LockOptions::renewal_interval_secs`].
fn default_renewal_interval_secs() -> u64 {
    60
}
