//! Reporting views.
//!
//! Immutable snapshots returned to the outside world. A view is computed
//! from a job record plus the oracle's current replica map at the moment of
//! the call; concurrent mutation of the underlying job never affects an
//! already-returned view.

use std::collections::HashMap;

use repair_db::{JobId, JobStatus};
use topology::{NodeId, ReplicationState, TableReference, TokenRange, VnodeState};

use crate::{ongoing::OngoingJob, store::JobRecord};

/// A snapshot of one virtual node's repair state, shaped for the REST layer.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNodeStateView {
    /// Exclusive start token of the range.
    pub start_token: i64,
    /// Inclusive end token of the range.
    pub end_token: i64,
    /// Replica node ids holding the range.
    pub replicas: Vec<String>,
    /// When the range was last repaired, in epoch milliseconds.
    pub last_repaired_at_in_ms: i64,
    /// Whether the range counts as repaired for this job.
    pub repaired: bool,
}

impl From<VnodeState> for VirtualNodeStateView {
    fn from(state: VnodeState) -> Self {
        Self {
            start_token: state.range().start(),
            end_token: state.range().end(),
            replicas: state.replicas().iter().map(NodeId::to_string).collect(),
            last_repaired_at_in_ms: state.last_repaired_at_ms(),
            repaired: state.repaired(),
        }
    }
}

/// An immutable snapshot of one on-demand repair job.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnDemandRepairJobView {
    /// The job id.
    pub id: JobId,
    /// The daemon that owns execution of this record.
    pub host_id: NodeId,
    /// Keyspace name of the repaired table.
    pub keyspace: String,
    /// Table name of the repaired table.
    pub table: String,
    /// Job status at snapshot time.
    pub status: JobStatus,
    /// Fraction of ranges repaired, in `[0, 1]`.
    pub completed_ratio: f64,
    /// When the job was created, in epoch milliseconds.
    pub start_time_ms: i64,
    /// When the job reached a terminal status, in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_time_ms: Option<i64>,
    /// Per-vnode repair states.
    pub virtual_nodes: Vec<VirtualNodeStateView>,
}

impl OnDemandRepairJobView {
    /// Snapshots a live in-memory job.
    pub(crate) fn from_ongoing(job: &OngoingJob, oracle: &dyn ReplicationState) -> Self {
        let repaired_after_ms = job.started_at_ms() - 1;
        let virtual_nodes = job
            .all_ranges()
            .iter()
            .map(|range| {
                vnode_view(
                    job.table(),
                    *range,
                    job.range_repaired_at_ms(*range),
                    repaired_after_ms,
                    oracle,
                )
            })
            .collect();

        Self {
            id: job.id(),
            host_id: job.host_id(),
            keyspace: job.table().keyspace().to_string(),
            table: job.table().table().to_string(),
            status: job.status(),
            completed_ratio: job.completed_ratio(),
            start_time_ms: job.started_at_ms(),
            completed_time_ms: job.completed_at_ms(),
            virtual_nodes,
        }
    }

    /// Builds a view for a persisted record, local or from a peer host.
    ///
    /// The record's full range set is reconstructed from the oracle for the
    /// owning host; when the table is gone from the schema the view falls
    /// back to the ranges the record itself knows about.
    pub(crate) fn from_record(record: &JobRecord, oracle: &dyn ReplicationState) -> Self {
        let all_ranges = oracle
            .token_ranges_for(&record.table, record.host)
            .unwrap_or_else(|| record.repaired_ranges.clone());

        let repaired_at_ms: HashMap<TokenRange, i64> = record
            .repaired_ranges
            .iter()
            .map(|range| {
                (
                    *range,
                    record.completed_at_ms.unwrap_or(record.started_at_ms),
                )
            })
            .collect();

        let completed_ratio = if all_ranges.is_empty() {
            1.0
        } else {
            (record.repaired_ranges.len() as f64 / all_ranges.len() as f64).min(1.0)
        };

        let repaired_after_ms = record.started_at_ms - 1;
        let virtual_nodes = all_ranges
            .iter()
            .map(|range| {
                vnode_view(
                    &record.table,
                    *range,
                    repaired_at_ms.get(range).copied(),
                    repaired_after_ms,
                    oracle,
                )
            })
            .collect();

        Self {
            id: record.job_id,
            host_id: record.host,
            keyspace: record.table.keyspace().to_string(),
            table: record.table.table().to_string(),
            status: record.status,
            completed_ratio,
            start_time_ms: record.started_at_ms,
            completed_time_ms: record.completed_at_ms,
            virtual_nodes,
        }
    }
}

fn vnode_view(
    table: &TableReference,
    range: TokenRange,
    repaired_at_ms: Option<i64>,
    repaired_after_ms: i64,
    oracle: &dyn ReplicationState,
) -> VirtualNodeStateView {
    let replicas = oracle.replicas_for(table, range);
    VnodeState::new(range, replicas, repaired_at_ms.unwrap_or(0), repaired_after_ms).into()
}
