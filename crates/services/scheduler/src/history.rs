//! Repair history seam.
//!
//! Every executed range task is recorded through this sink: which range of
//! which table, on which host, and how the session ended.

use async_trait::async_trait;
use repair_db::{RepairDb, SessionStatus, repair_history};
use topology::{NodeId, TableReference, TokenRange};

/// How a recorded repair session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairSessionOutcome {
    /// The range was reconciled.
    Success,
    /// The database reported nothing to do for the range.
    Skipped,
    /// The session failed.
    Failed,
}

/// Sink receiving one entry per executed repair session.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Recording failures must never fail the repair itself; implementations
/// log and move on.
#[async_trait]
pub trait RepairHistorySink: Send + Sync {
    /// A repair session for `range` of `table` just began.
    ///
    /// Returns an opaque session token passed back on close, or `None` when
    /// the session could not be recorded.
    async fn session_started(
        &self,
        host: NodeId,
        table: &TableReference,
        range: TokenRange,
    ) -> Option<i64>;

    /// A previously recorded session ended.
    async fn session_closed(&self, session: i64, outcome: RepairSessionOutcome);
}

/// History sink writing to the repair state database.
pub struct DbHistorySink {
    db: RepairDb,
}

impl DbHistorySink {
    /// Creates a sink writing to the given repair state DB.
    #[must_use]
    pub fn new(db: RepairDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RepairHistorySink for DbHistorySink {
    async fn session_started(
        &self,
        host: NodeId,
        table: &TableReference,
        range: TokenRange,
    ) -> Option<i64> {
        match repair_history::session_started(&self.db, host, table, range).await {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::warn!(
                    %table, %range,
                    error = %err, error_source = monitoring::logging::error_source(&err),
                    "failed to record repair session start"
                );
                None
            }
        }
    }

    async fn session_closed(&self, session: i64, outcome: RepairSessionOutcome) {
        let status = match outcome {
            RepairSessionOutcome::Success => SessionStatus::Success,
            RepairSessionOutcome::Skipped => SessionStatus::Skipped,
            RepairSessionOutcome::Failed => SessionStatus::Failed,
        };
        if let Err(err) = repair_history::session_closed(&self.db, session, status).await {
            tracing::warn!(
                session,
                error = %err, error_source = monitoring::logging::error_source(&err),
                "failed to record repair session outcome"
            );
        }
    }
}

/// No-op implementation for embedders that do not record history.
pub struct NoOpHistorySink;

#[async_trait]
impl RepairHistorySink for NoOpHistorySink {
    async fn session_started(
        &self,
        _host: NodeId,
        _table: &TableReference,
        _range: TokenRange,
    ) -> Option<i64> {
        // No-op: history disabled
        None
    }

    async fn session_closed(&self, _session: i64, _outcome: RepairSessionOutcome) {
        // No-op: history disabled
    }
}
