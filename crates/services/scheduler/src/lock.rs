//! Distributed lock seam.
//!
//! For a given `(table, range)` at most one repair may run anywhere in the
//! cluster at any instant. That exclusion is provided here, not by the
//! scheduler: a lock factory hands out cluster-scoped locks keyed by a
//! logical resource name. Contention is an expected, quiet outcome.

use std::time::Duration;

use async_trait::async_trait;
use repair_db::{RepairDb, leases};
use tokio_util::task::AbortOnDropHandle;
use topology::NodeId;

/// Errors that can occur while acquiring a distributed lock.
///
/// Contention is not an error; it is the `Ok(None)` acquisition outcome.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock backend failed, e.g. a lost database connection.
    #[error("lock backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Cluster-scoped mutual exclusion keyed by logical resource names.
///
/// Implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait LockFactory: Send + Sync {
    /// Attempts to take the lock on `resource`.
    ///
    /// Returns `Ok(None)` when another holder currently owns the resource.
    async fn try_lock(&self, resource: &str) -> Result<Option<Box<dyn DistributedLock>>, LockError>;
}

/// A held distributed lock.
///
/// Dropping a lock without releasing it stops keeping it alive; the
/// underlying grant then lapses on its own rather than immediately.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// The resource this lock covers.
    fn resource(&self) -> &str;

    /// Releases the lock immediately.
    async fn release(self: Box<Self>);
}

/// Lock factory backed by lease rows in the repair state database.
///
/// Acquisition is a single compare-and-set; a held lock is kept alive by a
/// background renewal task until released or dropped. A daemon crash leaves
/// the lease row behind, and it becomes claimable once it expires.
pub struct DbLockFactory {
    db: RepairDb,
    holder: NodeId,
    lease_duration: Duration,
    renewal_interval: Duration,
}

impl DbLockFactory {
    /// Creates a factory acquiring leases on behalf of `holder`.
    #[must_use]
    pub fn new(
        db: RepairDb,
        holder: NodeId,
        lease_duration: Duration,
        renewal_interval: Duration,
    ) -> Self {
        Self {
            db,
            holder,
            lease_duration,
            renewal_interval,
        }
    }
}

#[async_trait]
impl LockFactory for DbLockFactory {
    async fn try_lock(&self, resource: &str) -> Result<Option<Box<dyn DistributedLock>>, LockError> {
        let lease = leases::try_acquire(&self.db, resource, self.holder, self.lease_duration)
            .await
            .map_err(|err| LockError::Backend(err.into()))?;

        let Some(lease) = lease else {
            tracing::debug!(resource, "repair lease contended");
            return Ok(None);
        };

        tracing::debug!(resource, holder = %self.holder, "repair lease acquired");

        let renewal = {
            let db = self.db.clone();
            let holder = self.holder;
            let resource = lease.resource.clone();
            let lease_duration = self.lease_duration;
            let renewal_interval = self.renewal_interval;
            AbortOnDropHandle::new(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(renewal_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The first tick fires immediately; skip it.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match leases::renew(&db, &resource, holder, lease_duration).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::error!(
                                resource,
                                %holder,
                                "repair lease lost before release; repair may overlap"
                            );
                            break;
                        }
                        Err(err) => {
                            tracing::warn!(
                                resource,
                                error = %err,
                                error_source = monitoring::logging::error_source(&err),
                                "failed to renew repair lease; retrying on next tick"
                            );
                        }
                    }
                }
            }))
        };

        Ok(Some(Box::new(DbLock {
            db: self.db.clone(),
            holder: self.holder,
            resource: lease.resource,
            _renewal: renewal,
        })))
    }
}

/// A held lease-backed lock.
struct DbLock {
    db: RepairDb,
    holder: NodeId,
    resource: String,
    _renewal: AbortOnDropHandle<()>,
}

#[async_trait]
impl DistributedLock for DbLock {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn release(self: Box<Self>) {
        // Stop renewing before deleting the row.
        drop(self._renewal);
        match leases::release(&self.db, &self.resource, self.holder).await {
            Ok(true) => {
                tracing::debug!(resource = %self.resource, "repair lease released");
            }
            Ok(false) => {
                tracing::warn!(
                    resource = %self.resource,
                    "repair lease was no longer held at release"
                );
            }
            Err(err) => {
                // The row expires on its own; losing the delete is benign.
                tracing::warn!(
                    resource = %self.resource,
                    error = %err,
                    error_source = monitoring::logging::error_source(&err),
                    "failed to release repair lease"
                );
            }
        }
    }
}
