//! Token topology model for the repair scheduler.
//!
//! This crate models the partition ring of a replicated wide-column cluster:
//! token ranges, replica placement, and a deterministic fingerprint of the
//! range-to-replicas mapping used to detect ownership-changing topology
//! updates. The scheduler consumes the ring exclusively through the
//! [`ReplicationState`] oracle; recomputing placement on demand is the
//! oracle implementation's concern.

mod node_id;
mod replication;
mod table_reference;
#[cfg(feature = "test-utils")]
pub mod test_utils;
mod token_range;
mod vnode;

pub use self::{
    node_id::NodeId,
    replication::{ReplicationState, TokenMapHash, token_map_hash},
    table_reference::TableReference,
    token_range::TokenRange,
    vnode::VnodeState,
};
