//! Cluster topology and shard routing.
//!
//! Membership and discovery live outside this crate; a `ClusterTopology` only
//! answers "which nodes own this shard", deterministically for a fixed node set.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;

/// A cluster member, identified by its network address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Node {
    pub host: String,
}

impl Node {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// Shard → replica set assignment.
pub trait ClusterTopology: Send + Sync + 'static {
    /// Every member of the cluster.
    fn nodes(&self) -> &[Node];

    /// Owning nodes of `shard`, primary first.
    fn owning_nodes(&self, shard: u64) -> Vec<Node>;
}

/// Fixed membership with jump-consistent-hash partition placement.
#[derive(Debug, Clone)]
pub struct StaticCluster {
    nodes: Vec<Node>,
    replica_n: usize,
    partition_n: u64,
}

pub const DEFAULT_PARTITION_N: u64 = 256;

impl StaticCluster {
    /// Nodes are sorted by host so every member computes the same placement.
    pub fn new(hosts: impl IntoIterator<Item = impl Into<String>>, replica_n: usize) -> Self {
        let mut nodes: Vec<Node> = hosts.into_iter().map(Node::new).collect();
        nodes.sort();
        nodes.dedup();
        Self {
            nodes,
            replica_n: replica_n.max(1),
            partition_n: DEFAULT_PARTITION_N,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        let mut cluster = Self::new(config.hosts.iter().cloned(), config.replica_n);
        cluster.partition_n = config.partition_n.max(1);
        cluster
    }

    /// Single-node cluster, handy for embedding and tests.
    pub fn single(host: impl Into<String>) -> Self {
        Self::new([host.into()], 1)
    }

    pub fn partition(&self, shard: u64) -> u64 {
        shard % self.partition_n
    }
}

impl ClusterTopology for StaticCluster {
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn owning_nodes(&self, shard: u64) -> Vec<Node> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let n = self.nodes.len();
        let start = jump_hash(self.partition(shard), n as i64) as usize;
        let replicas = self.replica_n.min(n);
        (0..replicas)
            .map(|i| self.nodes[(start + i) % n].clone())
            .collect()
    }
}

/// Jump consistent hash (Lamping & Veach).
fn jump_hash(mut key: u64, buckets: i64) -> i64 {
    let (mut b, mut j) = (-1i64, 0i64);
    while j < buckets {
        b = j;
        key = key.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b.wrapping_add(1) as f64) * ((1i64 << 31) as f64 / ((key >> 33).wrapping_add(1) as f64))) as i64;
    }
    b
}

/// Group shards by their primary owner.
///
/// Only the primary is ever used, even though replicas could share read load.
pub fn shards_by_node(
    topology: &dyn ClusterTopology,
    shards: &[u64],
) -> BTreeMap<Node, Vec<u64>> {
    let mut groups: BTreeMap<Node, Vec<u64>> = BTreeMap::new();
    for &shard in shards {
        if let Some(primary) = topology.owning_nodes(shard).into_iter().next() {
            groups.entry(primary).or_default().push(shard);
        }
    }
    groups
}
