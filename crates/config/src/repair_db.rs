//! Repair state database connection settings.

pub use repair_db::DEFAULT_POOL_SIZE as DEFAULT_REPAIR_DB_CONN_POOL_SIZE;

/// Repair state database connection and behavior settings.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RepairDbConfig {
    /// Database connection URL (required)
    pub url: String,

    /// Size of the connection pool (default: 10)
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Automatically run database migrations on startup (default: true)
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,
}

/// Serde default for [`RepairDbConfig::pool_size`]. Returns [`DEFAULT_REPAIR_DB_CONN_POOL_SIZE`].
fn default_pool_size() -> u32 {
    DEFAULT_REPAIR_DB_CONN_POOL_SIZE
}

/// Serde default for [`RepairDbConfig::auto_migrate`]. Returns `true`.
fn default_auto_migrate() -> bool {
    true
}
