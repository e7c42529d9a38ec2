//! In-memory replication oracle for tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Mutex,
};

use crate::{NodeId, ReplicationState, TableReference, TokenMapHash, TokenRange, token_map_hash};

/// A [`ReplicationState`] backed by a fixed, mutable in-memory token map.
///
/// Tests seed per-table mappings up front and may replace them mid-test to
/// simulate ownership-changing topology updates.
#[derive(Debug, Default)]
pub struct StaticReplicationState {
    tables: Mutex<HashMap<TableReference, TableTopology>>,
}

#[derive(Debug, Clone)]
struct TableTopology {
    token_map: BTreeMap<TokenRange, BTreeSet<NodeId>>,
    datacenters: BTreeSet<String>,
}

impl StaticReplicationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) the mapping for `table`.
    pub fn set_table(
        &self,
        table: TableReference,
        token_map: BTreeMap<TokenRange, BTreeSet<NodeId>>,
        datacenters: impl IntoIterator<Item = String>,
    ) {
        let mut tables = self.tables.lock().unwrap();
        tables.insert(
            table,
            TableTopology {
                token_map,
                datacenters: datacenters.into_iter().collect(),
            },
        );
    }

    /// Drops `table` from the schema, as if it was deleted.
    pub fn remove_table(&self, table: &TableReference) {
        self.tables.lock().unwrap().remove(table);
    }
}

impl ReplicationState for StaticReplicationState {
    fn token_ranges_for(&self, table: &TableReference, host: NodeId) -> Option<Vec<TokenRange>> {
        let tables = self.tables.lock().unwrap();
        let topology = tables.get(table)?;
        Some(
            topology
                .token_map
                .iter()
                .filter(|(_, replicas)| replicas.contains(&host))
                .map(|(range, _)| *range)
                .collect(),
        )
    }

    fn replicas_for(&self, table: &TableReference, range: TokenRange) -> BTreeSet<NodeId> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .and_then(|topology| topology.token_map.get(&range).cloned())
            .unwrap_or_default()
    }

    fn participating_hosts(&self, table: &TableReference) -> BTreeSet<NodeId> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|topology| {
                topology
                    .token_map
                    .values()
                    .flat_map(|replicas| replicas.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn datacenters_for(&self, table: &TableReference) -> BTreeSet<String> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|topology| topology.datacenters.clone())
            .unwrap_or_default()
    }

    fn token_map_hash(&self, table: &TableReference) -> Option<TokenMapHash> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(table)
            .map(|topology| token_map_hash(&topology.token_map))
    }
}
