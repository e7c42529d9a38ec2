use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use crate::{NodeId, TableReference, TokenRange};

/// Fingerprint of a table's full range-to-replicas mapping.
///
/// The hash changes when, and only when, the mapping changes in a way that
/// affects repair correctness: ring membership or range ownership. Jobs
/// persist the hash at creation time and must fail when the live topology
/// no longer matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TokenMapHash(i64);

impl TokenMapHash {
    /// Wraps an already-computed hash value, e.g. one read back from the
    /// status store.
    #[must_use]
    pub const fn from_i64(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw hash value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for TokenMapHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes the fingerprint of a range-to-replicas mapping.
///
/// The digest runs over the canonical (sorted) encoding of the map, so any
/// oracle implementation producing the same mapping produces the same hash,
/// independent of process or platform.
#[must_use]
pub fn token_map_hash(token_map: &BTreeMap<TokenRange, BTreeSet<NodeId>>) -> TokenMapHash {
    let mut hasher = Sha256::new();
    for (range, replicas) in token_map {
        hasher.update(range.start().to_be_bytes());
        hasher.update(range.end().to_be_bytes());
        for replica in replicas {
            hasher.update(replica.as_uuid().as_bytes());
        }
    }
    let digest = hasher.finalize();

    // Leading 8 bytes of the digest, interpreted big-endian.
    let mut head = [0_u8; 8];
    head.copy_from_slice(&digest[..8]);
    TokenMapHash(i64::from_be_bytes(head))
}

/// Read-only oracle over the cluster's current replica placement.
///
/// Implementations may recompute placement on every call; callers must not
/// assume the answers are stable between calls. All methods answer `None`
/// (or an empty set) for tables the schema does not know about.
pub trait ReplicationState: Send + Sync {
    /// The token ranges `host` replicates for `table`, in ring order.
    ///
    /// Returns `None` when the table does not exist in the live schema.
    fn token_ranges_for(&self, table: &TableReference, host: NodeId) -> Option<Vec<TokenRange>>;

    /// The replica set holding `range` of `table`.
    fn replicas_for(&self, table: &TableReference, range: TokenRange) -> BTreeSet<NodeId>;

    /// Every host replicating at least one range of `table`.
    fn participating_hosts(&self, table: &TableReference) -> BTreeSet<NodeId>;

    /// The datacenters replicating `table`.
    fn datacenters_for(&self, table: &TableReference) -> BTreeSet<String>;

    /// Fingerprint of the current full mapping for `table`.
    ///
    /// Returns `None` when the table does not exist in the live schema.
    fn token_map_hash(&self, table: &TableReference) -> Option<TokenMapHash>;
}
