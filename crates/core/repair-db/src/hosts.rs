//! Repair daemon presence registry
//!
//! One row per database node running a repair daemon. Registration is an
//! idempotent upsert; liveness is a periodically refreshed heartbeat
//! column. A PostgreSQL advisory lock on the host id guarantees at most
//! one daemon process per node.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use topology::NodeId;
use uuid::Uuid;

pub(crate) mod sql;

use crate::{Connection, Executor, RepairDb, error::Error};

/// How often a live daemon refreshes its heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Registers a daemon in the repair state database
///
/// Inserts the host into the `hosts` table with ON CONFLICT UPDATE for
/// idempotency. If the host exists, its `registered_at` and `heartbeat_at`
/// fields are updated; `created_at` is only set on initial insert.
#[tracing::instrument(skip(exe), err)]
pub async fn register<'c, E>(exe: E, host_id: NodeId) -> Result<(), Error>
where
    E: Executor<'c>,
{
    sql::register(exe, host_id.as_uuid())
        .await
        .map_err(Error::Database)
}

/// Updates the `heartbeat_at` column for a given host.
#[tracing::instrument(skip(exe), err)]
pub async fn update_heartbeat<'c, E>(exe: E, host_id: NodeId) -> Result<(), Error>
where
    E: Executor<'c>,
{
    sql::update_heartbeat(exe, host_id.as_uuid())
        .await
        .map_err(Error::Database)
}

/// Returns the hosts whose heartbeat is within the given interval.
#[tracing::instrument(skip(exe), err)]
pub async fn list_active<'c, E>(exe: E, interval: Duration) -> Result<Vec<NodeId>, Error>
where
    E: Executor<'c>,
{
    let hosts = sql::list_active(exe, interval)
        .await
        .map_err(Error::Database)?;
    Ok(hosts.into_iter().map(NodeId::new).collect())
}

/// Establishes a dedicated connection and returns the daemon heartbeat loop.
///
/// The returned future refreshes the heartbeat every
/// [`HEARTBEAT_INTERVAL`] and never completes on the happy path. The
/// dedicated connection also carries a PostgreSQL advisory lock on the host
/// id, held for as long as the connection stays open; a second daemon
/// process claiming the same host id fails here with
/// [`Error::HostIdInUse`].
#[tracing::instrument(skip(db), err)]
pub async fn heartbeat_loop(
    db: &RepairDb,
    host_id: NodeId,
) -> Result<BoxFuture<'static, Result<(), Error>>, Error> {
    let mut conn = Connection::connect(db.url()).await.map_err(Error::from)?;

    let locked = sql::lock_host_id(&mut conn, host_id.as_uuid())
        .await
        .map_err(Error::Database)?;
    if !locked {
        return Err(Error::HostIdInUse(host_id));
    }

    let fut = async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            sql::update_heartbeat(&mut conn, host_id.as_uuid())
                .await
                .map_err(Error::Database)?;
        }
    };

    Ok(Box::pin(fut))
}

/// A registered repair daemon host.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Host {
    /// ID of the database node this daemon runs on
    pub host_id: Uuid,

    /// Timestamp when the host was first registered
    pub created_at: DateTime<Utc>,

    /// Timestamp when the host was last registered (updated on every re-registration)
    pub registered_at: DateTime<Utc>,

    /// Last heartbeat timestamp (updated periodically by the daemon)
    pub heartbeat_at: DateTime<Utc>,
}
