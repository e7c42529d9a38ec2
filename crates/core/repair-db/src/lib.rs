//! Repair state database
//!
//! Durable coordination state shared by every repair daemon in the cluster:
//! on-demand job records, distributed repair leases, daemon presence, and
//! the repair history log. This crate owns the backing schema; consumers
//! see typed operations only.

use std::{sync::Arc, time::Duration};

use futures::{future::BoxFuture, stream::BoxStream};

mod db;
mod error;
pub mod hosts;
pub mod leases;
pub mod on_demand;
pub mod repair_history;

use self::db::ConnPool;
pub use self::{
    db::{ConnError, Connection, Executor, Transaction},
    error::Error,
    hosts::{HEARTBEAT_INTERVAL, Host},
    leases::LeaseRow,
    on_demand::{JobId, JobStatus, JobStatusUpdateError, OnDemandJobRow},
    repair_history::{HistoryRow, SessionStatus},
};

/// Default pool size for the repair state DB.
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Connection pool to the repair state DB. Clones will refer to the same instance.
#[derive(Clone, Debug)]
pub struct RepairDb {
    pool: ConnPool,
    url: Arc<str>,
}

impl RepairDb {
    /// Sets up a connection pool to the repair state DB
    ///
    /// Runs migrations if necessary.
    #[tracing::instrument(skip_all, err)]
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, Error> {
        Self::connect_with_config(url, pool_size, true).await
    }

    /// Sets up a connection pool to the repair state DB with configurable
    /// migration behavior
    ///
    /// Runs migrations only if `auto_migrate` is true.
    #[tracing::instrument(skip_all, err)]
    pub async fn connect_with_config(
        url: &str,
        pool_size: u32,
        auto_migrate: bool,
    ) -> Result<Self, Error> {
        let pool = ConnPool::connect(url, pool_size).await?;
        if auto_migrate {
            pool.run_migrations().await?;
        }
        Ok(Self {
            pool,
            url: url.into(),
        })
    }

    /// Sets up a connection pool with retry logic for temporary databases.
    #[tracing::instrument(skip_all, err)]
    pub async fn connect_with_retry(url: &str, pool_size: u32) -> Result<Self, Error> {
        use backon::{ExponentialBuilder, Retryable};

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_max_times(20);

        fn is_db_starting_up(err: &ConnError) -> bool {
            matches!(
                err,
                ConnError::ConnectionError(sqlx::Error::Database(db_err))
                if db_err.code().is_some_and(|code| code == "57P03")
            )
        }

        fn notify_retry(err: &ConnError, dur: Duration) {
            tracing::warn!(
                error = %err,
                "Database still starting up during connection. Retrying in {:.1}s",
                dur.as_secs_f32()
            );
        }

        let pool = (|| ConnPool::connect(url, pool_size))
            .retry(retry_policy)
            .when(is_db_starting_up)
            .notify(notify_retry)
            .await?;

        pool.run_migrations().await?;

        Ok(Self {
            pool,
            url: url.into(),
        })
    }

    /// Begins a new database transaction
    ///
    /// Returns a `Transaction` that provides RAII semantics - it will
    /// automatically roll back when dropped unless explicitly committed with
    /// `.commit()`.
    #[tracing::instrument(skip(self), err)]
    pub async fn begin_txn(&self) -> Result<Transaction<'_>, Error> {
        let tx = self.pool.begin().await.map_err(Error::Database)?;
        Ok(Transaction::new(tx))
    }

    /// The connection URL this pool was created from.
    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub fn default_pool_size() -> u32 {
        DEFAULT_POOL_SIZE
    }
}

// Implement sqlx::Executor for &RepairDb by delegating to the pool
impl<'c> sqlx::Executor<'c> for &'c RepairDb {
    type Database = sqlx::Postgres;

    fn fetch_many<'e, 'q: 'e, E>(
        self,
        query: E,
    ) -> BoxStream<
        'e,
        Result<
            sqlx::Either<
                <sqlx::Postgres as sqlx::Database>::QueryResult,
                <sqlx::Postgres as sqlx::Database>::Row,
            >,
            sqlx::Error,
        >,
    >
    where
        'c: 'e,
        E: 'q + sqlx::Execute<'q, Self::Database>,
    {
        (&self.pool).fetch_many(query)
    }

    fn fetch_optional<'e, 'q: 'e, E>(
        self,
        query: E,
    ) -> BoxFuture<'e, Result<Option<<sqlx::Postgres as sqlx::Database>::Row>, sqlx::Error>>
    where
        'c: 'e,
        E: 'q + sqlx::Execute<'q, Self::Database>,
    {
        (&self.pool).fetch_optional(query)
    }

    fn prepare_with<'e, 'q: 'e>(
        self,
        sql: &'q str,
        parameters: &'e [<sqlx::Postgres as sqlx::Database>::TypeInfo],
    ) -> BoxFuture<'e, Result<<sqlx::Postgres as sqlx::Database>::Statement<'q>, sqlx::Error>>
    where
        'c: 'e,
    {
        (&self.pool).prepare_with(sql, parameters)
    }

    fn describe<'e, 'q: 'e>(
        self,
        sql: &'q str,
    ) -> BoxFuture<'e, Result<sqlx::Describe<Self::Database>, sqlx::Error>>
    where
        'c: 'e,
    {
        (&self.pool).describe(sql)
    }
}

impl<'c> Executor<'c> for &'c RepairDb {}

impl _priv::Sealed for &RepairDb {}

/// Private module for sealed trait pattern
///
/// This module contains the `Sealed` trait used to prevent external
/// implementations of our `Executor` trait. The trait implementations
/// are co-located with the `Executor` trait implementations in `db/`.
pub(crate) mod _priv {
    /// Sealed trait to prevent external implementations
    ///
    /// This trait has no methods and serves only as a marker.
    pub trait Sealed {}
}
