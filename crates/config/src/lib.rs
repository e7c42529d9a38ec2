//! Configuration for the Mend repair daemon.
//!
//! Settings are loaded with a figment pipeline: a TOML file merged with
//! `MEND_CONFIG_*` environment variables (`__` separates nesting levels),
//! the environment taking priority. Every section carries serde defaults so
//! an empty file is a valid configuration, except for the repair state DB
//! URL which has no sensible default.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format as _, Toml},
};

pub mod locks;
pub mod repair;
pub mod repair_db;
pub mod scheduler;

pub use self::{
    locks::{LockOptions, RepairLockType},
    repair::{RepairOptions, RepairParallelism, RepairType},
    repair_db::{DEFAULT_REPAIR_DB_CONN_POOL_SIZE, RepairDbConfig},
    scheduler::SchedulerOptions,
};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "MEND_CONFIG_";

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Repair execution options passed to the repair runner.
    #[serde(default)]
    pub repair: RepairOptions,

    /// Scheduler cadence and retention settings.
    #[serde(default)]
    pub scheduler: SchedulerOptions,

    /// Distributed lock settings.
    #[serde(default)]
    pub locks: LockOptions,

    /// Repair state database settings. `None` when no source provides a URL.
    #[serde(default)]
    pub repair_db: Option<RepairDbConfig>,
}

impl Config {
    /// Loads configuration from a TOML file and `MEND_CONFIG_*` env vars.
    ///
    /// The file may not exist; the environment alone is a valid source.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::Extraction)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The merged configuration sources could not be deserialized.
    #[error("Invalid configuration: {0}")]
    Extraction(#[source] figment::Error),
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn empty_sources_yield_defaults() {
        figment::Jail::expect_with(|jail| {
            //* Given
            jail.create_file("mend.toml", "")?;

            //* When
            let config = Config::load(Path::new("mend.toml")).expect("should load");

            //* Then
            assert_eq!(config.scheduler.sweep_interval_secs, 10);
            assert_eq!(config.locks.lock_type, RepairLockType::Vnode);
            assert!(config.repair_db.is_none());
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            //* Given
            jail.create_file(
                "mend.toml",
                r#"
                    [scheduler]
                    sweep_interval_secs = 30

                    [repair_db]
                    url = "postgres://file"
                "#,
            )?;
            jail.set_env("MEND_CONFIG_SCHEDULER__SWEEP_INTERVAL_SECS", "5");
            jail.set_env("MEND_CONFIG_REPAIR_DB__URL", "postgres://env");

            //* When
            let config = Config::load(Path::new("mend.toml")).expect("should load");

            //* Then
            assert_eq!(config.scheduler.sweep_interval_secs, 5);
            let repair_db = config.repair_db.expect("repair_db section should exist");
            assert_eq!(repair_db.url, "postgres://env");
            assert_eq!(repair_db.pool_size, DEFAULT_REPAIR_DB_CONN_POOL_SIZE);
            Ok(())
        });
    }

    #[test]
    fn repair_options_parse_from_toml() {
        figment::Jail::expect_with(|jail| {
            //* Given
            jail.create_file(
                "mend.toml",
                r#"
                    [repair]
                    parallelism = "datacenter_aware"
                    repair_type = "incremental"
                    priority = 3
                "#,
            )?;

            //* When
            let config = Config::load(Path::new("mend.toml")).expect("should load");

            //* Then
            assert_eq!(
                config.repair.parallelism,
                RepairParallelism::DatacenterAware
            );
            assert_eq!(config.repair.repair_type, RepairType::Incremental);
            assert_eq!(config.repair.priority, 3);
            Ok(())
        });
    }
}
