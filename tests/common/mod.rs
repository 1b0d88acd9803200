//! Shared fixtures: an in-process cluster of executors wired through the
//! loopback transport.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use bitshard::cluster::{ClusterTopology, Node, StaticCluster};
use bitshard::config::ExecutorConfig;
use bitshard::model::{Call, SetBit, TopN};
use bitshard::remote::{LoopbackTransport, QueryHandler, QueryParser};
use bitshard::{Error, ExecOptions, Executor, MemoryStorage, QueryValue, Result};

/// Recognises the text of calls it has been shown.
///
/// A `TopN()` refetch is recognised from the call it refetches for: the same call
/// with `n=0` and an explicit id list.
#[derive(Default)]
pub struct TableParser {
    calls: RwLock<Vec<Call>>,
}

impl TableParser {
    pub fn learn(&self, calls: &[Call]) {
        self.calls.write().extend(calls.iter().cloned());
    }

    fn parse_line(&self, line: &str) -> Result<Call> {
        let known = self.calls.read();
        if let Some(call) = known.iter().find(|c| c.to_string() == line) {
            return Ok(call.clone());
        }
        if let Some(ids) = refetch_ids(line) {
            for call in known.iter() {
                if let Call::TopN(top) = call {
                    let refetch = Call::TopN(TopN { n: 0, row_ids: ids.clone(), ..top.clone() });
                    if refetch.to_string() == line {
                        return Ok(refetch);
                    }
                }
            }
        }
        Err(Error::ParseError(format!("unknown call: {line}")))
    }
}

fn refetch_ids(line: &str) -> Option<Vec<u64>> {
    let start = line.find("ids=[")? + "ids=[".len();
    let len = line[start..].find(']')?;
    line[start..start + len]
        .split(", ")
        .map(|id| id.parse().ok())
        .collect()
}

impl QueryParser for TableParser {
    fn parse(&self, text: &str) -> Result<Vec<Call>> {
        text.lines().map(|line| self.parse_line(line)).collect()
    }
}

/// Executors for `hosts`, each with its own storage, reachable through one
/// shared loopback transport.
pub struct TestCluster {
    pub topology: Arc<StaticCluster>,
    pub transport: Arc<LoopbackTransport>,
    pub parser: Arc<TableParser>,
    pub nodes: Vec<Arc<Executor<MemoryStorage>>>,
}

impl TestCluster {
    pub fn new(hosts: &[&str], replica_n: usize) -> Self {
        Self::with_config(hosts, replica_n, |_| {})
    }

    pub fn with_config(hosts: &[&str], replica_n: usize, tweak: impl Fn(&mut ExecutorConfig)) -> Self {
        let topology = Arc::new(StaticCluster::new(hosts.iter().copied(), replica_n));
        let transport = Arc::new(LoopbackTransport::new());
        let parser = Arc::new(TableParser::default());

        let nodes = topology
            .nodes()
            .iter()
            .map(|node| {
                let mut config = ExecutorConfig::new(node.host.clone());
                tweak(&mut config);
                let executor = Arc::new(Executor::new(
                    Arc::new(MemoryStorage::new()),
                    topology.clone(),
                    transport.clone(),
                    config,
                ));
                let handler = QueryHandler::new(executor.clone(), parser.clone());
                transport.register(node.host.clone(), Arc::new(handler));
                executor
            })
            .collect();

        Self { topology, transport, parser, nodes }
    }

    /// Executor answering for `host`.
    pub fn node(&self, host: &str) -> &Arc<Executor<MemoryStorage>> {
        self.nodes
            .iter()
            .find(|e| e.node().host == host)
            .unwrap_or_else(|| panic!("no node {host}"))
    }

    /// Run `calls` with the first node as coordinator.
    pub async fn query(&self, index: &str, calls: Vec<Call>, shards: &[u64]) -> Result<Vec<QueryValue>> {
        self.query_on(0, index, calls, shards).await
    }

    pub async fn query_on(
        &self,
        node: usize,
        index: &str,
        calls: Vec<Call>,
        shards: &[u64],
    ) -> Result<Vec<QueryValue>> {
        self.parser.learn(&calls);
        self.nodes[node].execute(index, &calls, shards, &ExecOptions::default()).await
    }

    /// Write `(row, column)` bits through the coordinator.
    pub async fn set_bits(&self, index: &str, frame: &str, bits: &[(u64, u64)]) {
        let calls: Vec<Call> = bits
            .iter()
            .map(|&(row_id, column_id)| {
                Call::SetBit(SetBit { frame: frame.into(), row_id, column_id, timestamp: None })
            })
            .collect();
        self.query(index, calls, &[0]).await.unwrap();
    }

    /// Hosts acting as primary for any of `shards`.
    pub fn primaries(&self, shards: &[u64]) -> BTreeSet<Node> {
        shards
            .iter()
            .filter_map(|&s| self.topology.owning_nodes(s).into_iter().next())
            .collect()
    }
}
