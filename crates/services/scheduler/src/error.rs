//! Error types for scheduler operations.

use crate::store::StoreError;

/// Errors that can occur when accepting an on-demand repair request.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleJobError {
    /// The requested table does not exist in the live schema.
    ///
    /// Nothing was persisted; the caller supplied a keyspace or table name
    /// the cluster does not know about.
    #[error("keyspace/table does not exist")]
    TableNotFound,

    /// The new job record could not be persisted.
    ///
    /// The request was rejected before any repair work started; the caller
    /// may retry once the store is reachable again.
    #[error("failed to persist repair job")]
    Store(#[source] StoreError),
}
