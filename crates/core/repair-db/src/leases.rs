//! Distributed repair leases
//!
//! A lease grants its holder exclusive right to repair a named resource
//! until it expires. Acquisition is a single compare-and-set statement:
//! insert the row, or steal it if the previous lease has expired (or is our
//! own). Holders are expected to renew well inside the lease duration and
//! to release explicitly when done; an unreleased lease from a crashed
//! daemon simply expires.

use std::time::Duration;

use chrono::{DateTime, Utc};
use topology::NodeId;
use uuid::Uuid;

pub(crate) mod sql;

use crate::{Executor, error::Error};

/// Attempts to acquire the lease on `resource` for `holder`.
///
/// Returns the lease row when acquired, `None` when another holder currently
/// has an unexpired lease. Re-acquiring an own lease refreshes it.
#[tracing::instrument(skip(exe), err)]
pub async fn try_acquire<'c, E>(
    exe: E,
    resource: &str,
    holder: NodeId,
    duration: Duration,
) -> Result<Option<LeaseRow>, Error>
where
    E: Executor<'c>,
{
    sql::try_acquire(exe, resource, holder.as_uuid(), duration)
        .await
        .map_err(Error::Database)
}

/// Extends an already-held lease.
///
/// Returns `false` when the lease is no longer held by `holder`, e.g. after
/// it expired and was stolen.
#[tracing::instrument(skip(exe), err)]
pub async fn renew<'c, E>(
    exe: E,
    resource: &str,
    holder: NodeId,
    duration: Duration,
) -> Result<bool, Error>
where
    E: Executor<'c>,
{
    sql::renew(exe, resource, holder.as_uuid(), duration)
        .await
        .map_err(Error::Database)
}

/// Releases a held lease.
///
/// Returns `false` when the lease was not held by `holder` (already expired
/// and stolen, or already released).
#[tracing::instrument(skip(exe), err)]
pub async fn release<'c, E>(exe: E, resource: &str, holder: NodeId) -> Result<bool, Error>
where
    E: Executor<'c>,
{
    sql::release(exe, resource, holder.as_uuid())
        .await
        .map_err(Error::Database)
}

/// Returns the current lease on `resource`, expired or not.
#[tracing::instrument(skip(exe), err)]
pub async fn get<'c, E>(exe: E, resource: &str) -> Result<Option<LeaseRow>, Error>
where
    E: Executor<'c>,
{
    sql::get(exe, resource).await.map_err(Error::Database)
}

/// A repair lease row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeaseRow {
    /// The leased resource name
    pub resource: String,

    /// The daemon holding the lease
    pub holder: Uuid,

    /// When the lease was acquired
    pub acquired_at: DateTime<Utc>,

    /// When the lease expires unless renewed
    pub expires_at: DateTime<Utc>,
}

impl LeaseRow {
    /// The holding host.
    #[must_use]
    pub fn holder(&self) -> NodeId {
        NodeId::new(self.holder)
    }
}

/// In-tree DB integration tests
#[cfg(test)]
mod tests {
    mod it_leases;
}
