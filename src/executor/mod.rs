//! # Query Executor
//!
//! Evaluates top-level calls against a sharded cluster:
//!
//! ```text
//! Call ──▶ shards_by_node ──▶ local shards: storage per shard ──┐
//!                        └──▶ remote groups: RemoteClient ──────┴──▶ merge ──▶ QueryValue
//! ```
//!
//! Merge laws by call kind:
//!
//! | Call | Per shard | Merge |
//! |------|-----------|-------|
//! | `Bitmap`, `Range`, `Union`, `Intersect`, `Difference` | bitmap | union |
//! | `Count` | cardinality | sum |
//! | `TopN` | ranked pairs | sum per id, sort, truncate, then exact refetch |
//! | `Bicliques` | search pipeline | concatenate, sort by score |
//!
//! Mutations route by the shard owning their column and go to every replica.

mod options;
pub mod stream;

pub use options::ExecOptions;
pub use stream::{CallEvent, CallPayload, PartialBicliques, ResultStream, ShardFailure};

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{stream as fstream, FutureExt, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::biclique::{candidate_universe, BicliqueStream};
use crate::cluster::{shards_by_node, ClusterTopology, Node, StaticCluster};
use crate::config::ExecutorConfig;
use crate::model::*;
use crate::remote::{LoopbackTransport, RemoteClient, Transport};
use crate::storage::{ShardStorage, TopOptions};
use crate::{Error, Result};

// ============================================================================
// Fan-out calls and their reducers
// ============================================================================

/// Calls evaluated per shard and merged.
#[derive(Debug, Clone, Copy)]
enum ReadCall<'a> {
    Bitmap(&'a BitmapCall),
    Count(&'a BitmapCall),
    TopN(&'a TopN),
    Bicliques(&'a Bicliques),
}

impl ReadCall<'_> {
    fn to_call(self) -> Call {
        match self {
            ReadCall::Bitmap(c) => Call::Bitmap(c.clone()),
            ReadCall::Count(c) => Call::Count(c.clone()),
            ReadCall::TopN(c) => Call::TopN(c.clone()),
            ReadCall::Bicliques(c) => Call::Bicliques(c.clone()),
        }
    }

    /// Truncation applied to the fully merged result.
    fn limit(self) -> usize {
        match self {
            ReadCall::TopN(c) => c.n,
            _ => 0,
        }
    }
}

enum Reducer {
    Bitmap(Bitmap),
    Count(u64),
    Pairs(PairSet),
    Bicliques(Vec<Biclique>),
}

impl Reducer {
    fn new(call: ReadCall<'_>) -> Self {
        match call {
            ReadCall::Bitmap(_) => Reducer::Bitmap(Bitmap::new()),
            ReadCall::Count(_) => Reducer::Count(0),
            ReadCall::TopN(_) => Reducer::Pairs(PairSet::new()),
            ReadCall::Bicliques(_) => Reducer::Bicliques(Vec::new()),
        }
    }

    fn add(&mut self, value: QueryValue) -> Result<()> {
        match self {
            Reducer::Bitmap(acc) => acc.merge(&value.into_bitmap()?),
            Reducer::Count(acc) => *acc += value.into_count()?,
            Reducer::Pairs(acc) => acc.add(value.into_pairs()?),
            Reducer::Bicliques(acc) => acc.extend(value.into_bicliques()?),
        }
        Ok(())
    }

    /// Ranked pairs are truncated to `n`; 0 keeps all.
    fn finish(self, n: usize) -> QueryValue {
        match self {
            Reducer::Bitmap(bm) => QueryValue::Bitmap(bm),
            Reducer::Count(count) => QueryValue::Count(count),
            Reducer::Pairs(set) => QueryValue::Pairs(set.into_ranked(n)),
            Reducer::Bicliques(mut bcs) => {
                sort_bicliques(&mut bcs);
                QueryValue::Bicliques(bcs)
            }
        }
    }
}

/// Bit mutations, routed to every replica of the column's shard.
#[derive(Debug, Clone, Copy)]
enum Mutation<'a> {
    Set(&'a SetBit),
    Clear(&'a ClearBit),
}

impl Mutation<'_> {
    fn column_id(self) -> u64 {
        match self {
            Mutation::Set(c) => c.column_id,
            Mutation::Clear(c) => c.column_id,
        }
    }

    fn to_call(self) -> Call {
        match self {
            Mutation::Set(c) => Call::SetBit(c.clone()),
            Mutation::Clear(c) => Call::ClearBit(c.clone()),
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Evaluates queries on behalf of one cluster node.
pub struct Executor<S: ShardStorage> {
    storage: Arc<S>,
    cluster: Arc<dyn ClusterTopology>,
    client: RemoteClient,
    config: ExecutorConfig,
    node: Node,
}

impl<S: ShardStorage> Executor<S> {
    pub fn new(
        storage: Arc<S>,
        cluster: Arc<dyn ClusterTopology>,
        transport: Arc<dyn Transport>,
        config: ExecutorConfig,
    ) -> Self {
        let client = RemoteClient::new(transport)
            .with_timeout(config.remote_timeout_ms.map(Duration::from_millis));
        let node = Node::new(config.host.clone());
        Self { storage, cluster, client, config, node }
    }

    /// A single-node executor: every shard is local.
    pub fn local(storage: Arc<S>) -> Self {
        let config = ExecutorConfig::default();
        let cluster = Arc::new(StaticCluster::single(config.host.clone()));
        Self::new(storage, cluster, Arc::new(LoopbackTransport::new()), config)
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The node this executor answers for.
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Evaluate `calls` in order over `shards` (every shard when empty).
    ///
    /// The first failing call aborts the query; no partial results are returned.
    pub async fn execute(
        &self,
        index: &str,
        calls: &[Call],
        shards: &[u64],
        opt: &ExecOptions,
    ) -> Result<Vec<QueryValue>> {
        if index.is_empty() {
            return Err(Error::MissingIndex);
        }
        let shards = self.resolve_shards(index, shards, opt).await?;
        info!(index, calls = calls.len(), shards = shards.len(), remote = opt.remote, "executing query");

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            opt.cancel.check()?;
            results.push(self.execute_call(index, call, &shards, opt).await?);
        }
        Ok(results)
    }

    /// Explicit shards, or `0..k` with `k` the cluster-wide shard count
    /// rounded up to a multiple of the cluster size.
    pub(crate) async fn resolve_shards(
        &self,
        index: &str,
        shards: &[u64],
        opt: &ExecOptions,
    ) -> Result<Vec<u64>> {
        if !shards.is_empty() {
            return Ok(shards.to_vec());
        }
        let node_n = (self.cluster.nodes().len() as u64).max(1);
        let shard_n = self.cluster_max_shard(index, opt).await? + 1;
        Ok((0..shard_n.div_ceil(node_n) * node_n).collect())
    }

    /// Highest shard held anywhere in the cluster. Remote requests only
    /// consult local storage so peers never fan out to each other.
    async fn cluster_max_shard(&self, index: &str, opt: &ExecOptions) -> Result<u64> {
        let local = self.storage.max_shard(index).await?;
        if opt.remote {
            return Ok(local);
        }
        let peers = self.cluster.nodes().iter().filter(|n| **n != self.node);
        let remote = futures::future::try_join_all(peers.map(|node| self.client.max_shard(node, index, opt))).await?;
        let max = remote.into_iter().fold(local, u64::max);
        debug!(index, local, max, "resolved cluster max shard");
        Ok(max)
    }

    pub(crate) async fn execute_call(
        &self,
        index: &str,
        call: &Call,
        shards: &[u64],
        opt: &ExecOptions,
    ) -> Result<QueryValue> {
        match call {
            Call::Bitmap(c) => {
                let mut bm = self.map_reduce(index, ReadCall::Bitmap(c), shards, opt).await?.into_bitmap()?;
                if let BitmapCall::Bitmap { frame, row_id } = c {
                    if !opt.remote {
                        bm.attrs = self.storage.row_attrs(index, frame, *row_id).await?;
                    }
                }
                Ok(QueryValue::Bitmap(bm))
            }
            Call::Count(c) => self.map_reduce(index, ReadCall::Count(c), shards, opt).await,
            Call::TopN(c) => Ok(QueryValue::Pairs(self.execute_top_n(index, c, shards, opt).await?)),
            Call::Bicliques(c) => self.map_reduce(index, ReadCall::Bicliques(c), shards, opt).await,
            Call::SetBit(c) => Ok(QueryValue::Changed(self.mutate(index, Mutation::Set(c), opt).await?)),
            Call::ClearBit(c) => {
                Ok(QueryValue::Changed(self.mutate(index, Mutation::Clear(c), opt).await?))
            }
            Call::SetRowAttrs(c) => {
                self.storage.set_row_attrs(index, &c.frame, c.row_id, c.attrs.clone()).await?;
                Ok(QueryValue::Nil)
            }
            Call::SetColumnAttrs(c) => {
                self.storage.set_column_attrs(index, c.column_id, c.attrs.clone()).await?;
                Ok(QueryValue::Nil)
            }
        }
    }

    // ========================================================================
    // TopN
    // ========================================================================

    /// Rank, then refetch exact counts for the winners: a row can miss a
    /// shard's local top list and be undercounted in the first pass.
    async fn execute_top_n(
        &self,
        index: &str,
        c: &TopN,
        shards: &[u64],
        opt: &ExecOptions,
    ) -> Result<Vec<Pair>> {
        let pairs = self.map_reduce(index, ReadCall::TopN(c), shards, opt).await?.into_pairs()?;
        if pairs.is_empty() || !c.row_ids.is_empty() || opt.remote {
            return Ok(pairs);
        }

        let mut refetch = c.clone();
        refetch.n = 0;
        refetch.row_ids = pair_ids(&pairs);
        debug!(index, frame = %c.frame, rows = refetch.row_ids.len(), "refetching top rows");
        self.map_reduce(index, ReadCall::TopN(&refetch), shards, opt).await?.into_pairs()
    }

    // ========================================================================
    // Map / reduce over shard groups
    // ========================================================================

    async fn map_reduce(
        &self,
        index: &str,
        call: ReadCall<'_>,
        shards: &[u64],
        opt: &ExecOptions,
    ) -> Result<QueryValue> {
        let groups = shards_by_node(self.cluster.as_ref(), shards);
        let mut reducer = Reducer::new(call);

        // Dropping the stream on error abandons groups still in flight.
        let mut partials = std::pin::pin!(fstream::iter(groups)
            .map(|(node, shards)| self.map_group(index, call, node, shards, opt))
            .buffered(self.config.max_concurrency.max(1)));
        while let Some(partial) = partials.try_next().await? {
            reducer.add(partial)?;
        }
        Ok(reducer.finish(call.limit()))
    }

    async fn map_group(
        &self,
        index: &str,
        call: ReadCall<'_>,
        node: Node,
        shards: Vec<u64>,
        opt: &ExecOptions,
    ) -> Result<QueryValue> {
        if node != self.node {
            let results = self.client.delegate(&node, index, &[call.to_call()], &shards, opt).await?;
            return results
                .into_iter()
                .next()
                .ok_or_else(|| Error::Protocol(format!("{node} returned no result")));
        }

        debug!(node = %node, shards = shards.len(), "evaluating local shards");
        let mut reducer = Reducer::new(call);
        for shard in shards {
            opt.cancel.check()?;
            reducer.add(self.map_shard(index, call, shard, opt).await?)?;
        }
        Ok(reducer.finish(0))
    }

    async fn map_shard(
        &self,
        index: &str,
        call: ReadCall<'_>,
        shard: u64,
        opt: &ExecOptions,
    ) -> Result<QueryValue> {
        Ok(match call {
            ReadCall::Bitmap(c) => QueryValue::Bitmap(self.bitmap_shard(index, c, shard).await?),
            ReadCall::Count(c) => QueryValue::Count(self.bitmap_shard(index, c, shard).await?.count()),
            ReadCall::TopN(c) => QueryValue::Pairs(self.top_n_shard(index, c, shard).await?),
            ReadCall::Bicliques(c) => {
                QueryValue::Bicliques(self.bicliques_shard(index, c, shard, opt).await?)
            }
        })
    }

    // ========================================================================
    // Per-shard evaluation
    // ========================================================================

    fn bitmap_shard<'a>(
        &'a self,
        index: &'a str,
        call: &'a BitmapCall,
        shard: u64,
    ) -> BoxFuture<'a, Result<Bitmap>> {
        async move {
            match call {
                BitmapCall::Bitmap { frame, row_id } => {
                    self.storage.bitmap(index, frame, shard, *row_id).await
                }
                BitmapCall::Range { frame, row_id, start, end } => {
                    self.storage.range(index, frame, shard, *row_id, *start, *end).await
                }
                BitmapCall::Union(children) => {
                    let mut out = Bitmap::new();
                    for child in children {
                        out.merge(&self.bitmap_shard(index, child, shard).await?);
                    }
                    Ok(out)
                }
                BitmapCall::Intersect(children) => {
                    self.fold_children(index, children, shard, |acc, bm| acc.intersect(bm)).await
                }
                BitmapCall::Difference(children) => {
                    self.fold_children(index, children, shard, |acc, bm| acc.difference(bm)).await
                }
            }
        }
        .boxed()
    }

    /// Left fold over child bitmaps; no children yields an empty bitmap.
    async fn fold_children(
        &self,
        index: &str,
        children: &[BitmapCall],
        shard: u64,
        op: impl Fn(&Bitmap, &Bitmap) -> Bitmap + Send,
    ) -> Result<Bitmap> {
        let mut acc: Option<Bitmap> = None;
        for child in children {
            let bm = self.bitmap_shard(index, child, shard).await?;
            acc = Some(match acc {
                Some(prev) => op(&prev, &bm),
                None => bm,
            });
        }
        Ok(acc.unwrap_or_default())
    }

    async fn top_n_shard(&self, index: &str, c: &TopN, shard: u64) -> Result<Vec<Pair>> {
        let src = match &c.src {
            Some(src) => Some(self.bitmap_shard(index, src, shard).await?),
            None => None,
        };
        let opt = TopOptions {
            n: c.n,
            src,
            row_ids: c.row_ids.clone(),
            filter_field: c.field.clone(),
            filter_values: c.filters.clone(),
        };
        self.storage.top(index, &c.frame, shard, &opt).await
    }

    async fn bicliques_shard(
        &self,
        index: &str,
        c: &Bicliques,
        shard: u64,
        opt: &ExecOptions,
    ) -> Result<Vec<Biclique>> {
        let ranked = self.storage.ranked_candidates(index, &c.frame, shard).await?;
        let universe = candidate_universe(ranked, c.n);
        debug!(index, frame = %c.frame, shard, universe = universe.len(), "searching bicliques");

        let found = BicliqueStream::spawn(universe, &opt.cancel).collect().await;
        // A cancelled search ends early; its partial output is not an answer.
        opt.cancel.check()?;
        Ok(found)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Apply to every owning replica in order; the last acknowledgement wins.
    async fn mutate(&self, index: &str, m: Mutation<'_>, opt: &ExecOptions) -> Result<bool> {
        let shard = shard_of(m.column_id());
        // A delegated mutation was already routed; forwarding again would loop.
        let targets = if opt.remote {
            vec![self.node.clone()]
        } else {
            self.cluster.owning_nodes(shard)
        };

        let mut changed = false;
        for node in targets {
            opt.cancel.check()?;
            changed = if node == self.node {
                self.mutate_local(index, m, opt).await?
            } else {
                self.client
                    .delegate(&node, index, &[m.to_call()], &[shard], opt)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Protocol(format!("{node} returned no result")))?
                    .into_changed()?
            };
        }
        Ok(changed)
    }

    async fn mutate_local(&self, index: &str, m: Mutation<'_>, opt: &ExecOptions) -> Result<bool> {
        match m {
            Mutation::Set(c) => {
                let timestamp = c.timestamp.or(opt.timestamp);
                self.storage
                    .set_bit(index, &c.frame, c.row_id, c.column_id, timestamp, opt.quantum)
                    .await
            }
            Mutation::Clear(c) => self.storage.clear_bit(index, &c.frame, c.row_id, c.column_id).await,
        }
    }
}
