use std::collections::BTreeSet;

use crate::{NodeId, TokenRange};

/// The repair state of a single virtual node.
///
/// Primarily a reporting type: each entry pairs a token range with its
/// replica set and the last time the range was successfully repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VnodeState {
    range: TokenRange,
    replicas: BTreeSet<NodeId>,
    last_repaired_at_ms: i64,
    repaired: bool,
}

impl VnodeState {
    /// Builds a vnode state, deriving `repaired` from the repair timestamp.
    ///
    /// A vnode counts as repaired when it was last repaired strictly after
    /// `repaired_after_ms`.
    #[must_use]
    pub fn new(
        range: TokenRange,
        replicas: BTreeSet<NodeId>,
        last_repaired_at_ms: i64,
        repaired_after_ms: i64,
    ) -> Self {
        Self {
            range,
            replicas,
            last_repaired_at_ms,
            repaired: last_repaired_at_ms > repaired_after_ms,
        }
    }

    /// The token range of this vnode.
    #[must_use]
    pub fn range(&self) -> TokenRange {
        self.range
    }

    /// The replica set holding this vnode.
    #[must_use]
    pub fn replicas(&self) -> &BTreeSet<NodeId> {
        &self.replicas
    }

    /// When this vnode was last successfully repaired, in epoch milliseconds.
    #[must_use]
    pub fn last_repaired_at_ms(&self) -> i64 {
        self.last_repaired_at_ms
    }

    /// Whether this vnode counts as repaired.
    #[must_use]
    pub fn repaired(&self) -> bool {
        self.repaired
    }
}
