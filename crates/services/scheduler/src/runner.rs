//! Repair action seam.
//!
//! The scheduler does not speak the repair protocol itself; it instructs
//! the local database node to repair one range of one table and observes
//! the outcome. Implementations wrap whatever management transport the
//! deployment uses.

use std::collections::BTreeSet;

use async_trait::async_trait;
use config::RepairOptions;
use topology::{NodeId, TableReference, TokenRange};

/// Convenience alias for boxed dynamic errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The observed outcome of one repair session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The range was reconciled.
    Success,
    /// The database reported nothing to do for the range.
    Skipped,
    /// The session failed; the range must be retried.
    Failed,
}

/// Drives a repair session on the local database node.
///
/// Implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait RepairRunner: Send + Sync {
    /// Repairs `range` of `table` across `replicas`.
    ///
    /// A clean protocol-level failure is reported as
    /// [`RepairOutcome::Failed`]; transport errors may surface as `Err` and
    /// are treated the same way by the caller.
    async fn repair(
        &self,
        table: &TableReference,
        range: TokenRange,
        replicas: &BTreeSet<NodeId>,
        options: &RepairOptions,
    ) -> Result<RepairOutcome, BoxError>;
}
