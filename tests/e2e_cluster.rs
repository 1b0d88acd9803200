//! End-to-end tests across an in-process two-node cluster.
//!
//! Each test exercises: coordinator executor -> shard routing -> loopback
//! transport -> peer QueryHandler -> peer executor -> merge.

mod common;

use bitshard::cluster::ClusterTopology;
use bitshard::model::*;
use bitshard::{Error, ExecOptions, ShardStorage};
use common::TestCluster;
use pretty_assertions::assert_eq;

const HOSTS: [&str; 2] = ["a:1", "b:1"];
const SHARDS: [u64; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

fn col(shard: u64, offset: u64) -> u64 {
    shard * SHARD_WIDTH + offset
}

fn row(id: u64) -> BitmapCall {
    BitmapCall::bitmap("f", id)
}

// ============================================================================
// 1. Bitmap and Count merge across nodes
// ============================================================================

#[tokio::test]
async fn test_bitmap_and_count_span_nodes() {
    let cluster = TestCluster::new(&HOSTS, 1);
    assert_eq!(cluster.primaries(&SHARDS).len(), 2, "shards must be spread over both nodes");

    let cols: Vec<u64> = SHARDS.iter().map(|&s| col(s, s + 1)).collect();
    let bits: Vec<(u64, u64)> = cols.iter().map(|&c| (10, c)).collect();
    cluster.set_bits("i", "f", &bits).await;

    for coordinator in 0..2 {
        let out = cluster
            .query_on(coordinator, "i", vec![Call::Bitmap(row(10)), Call::Count(row(10))], &SHARDS)
            .await
            .unwrap();
        let bm = out[0].clone().into_bitmap().unwrap();
        assert_eq!(bm.columns().collect::<Vec<_>>(), cols);
        assert_eq!(out[1], QueryValue::Count(8));
    }
}

#[tokio::test]
async fn test_nested_set_operations_across_nodes() {
    let cluster = TestCluster::new(&HOSTS, 1);
    let mut bits = Vec::new();
    for &s in &SHARDS {
        bits.extend([(1, col(s, 1)), (1, col(s, 2)), (2, col(s, 2)), (2, col(s, 3))]);
    }
    cluster.set_bits("i", "f", &bits).await;

    let out = cluster
        .query(
            "i",
            vec![
                Call::Count(BitmapCall::Union(vec![row(1), row(2)])),
                Call::Count(BitmapCall::Intersect(vec![row(1), row(2)])),
                Call::Count(BitmapCall::Difference(vec![row(1), row(2)])),
            ],
            &SHARDS,
        )
        .await
        .unwrap();
    assert_eq!(out, vec![QueryValue::Count(24), QueryValue::Count(8), QueryValue::Count(8)]);
}

// ============================================================================
// 2. TopN: two-phase merge returns exact counts
// ============================================================================

#[tokio::test]
async fn test_top_n_refetch_is_exact_across_nodes() {
    let cluster = TestCluster::new(&HOSTS, 1);
    let owners: Vec<_> = SHARDS.iter().map(|&s| cluster.topology.owning_nodes(s)[0].clone()).collect();
    let a_shard = SHARDS[0];
    let b_shard = SHARDS[owners.iter().position(|n| *n != owners[0]).unwrap()];

    // Row 1 leads on one node; on the other it trails row 2 and is cut from
    // that node's top-1 list, so the first pass undercounts it.
    let mut bits = Vec::new();
    bits.extend((0..5).map(|i| (1, col(a_shard, i))));
    bits.extend((0..4).map(|i| (2, col(a_shard, i))));
    bits.extend((0..3).map(|i| (2, col(b_shard, i))));
    bits.extend((0..2).map(|i| (1, col(b_shard, i))));
    cluster.set_bits("i", "f", &bits).await;

    let out = cluster.query("i", vec![Call::TopN(TopN::new("f", 1))], &SHARDS).await.unwrap();
    assert_eq!(out[0], QueryValue::Pairs(vec![Pair::new(1, 7)]));

    let all = cluster.query("i", vec![Call::TopN(TopN::new("f", 0))], &SHARDS).await.unwrap();
    assert_eq!(all[0], QueryValue::Pairs(vec![Pair::new(1, 7), Pair::new(2, 7)]));
}

#[tokio::test]
async fn test_top_n_with_src_across_nodes() {
    let cluster = TestCluster::new(&HOSTS, 1);
    let mut bits = Vec::new();
    for &s in &SHARDS {
        bits.extend([(1, col(s, 1)), (1, col(s, 2)), (2, col(s, 2)), (9, col(s, 2))]);
    }
    cluster.set_bits("i", "f", &bits).await;

    let top = TopN::new("f", 2).with_src(row(9));
    let out = cluster.query("i", vec![Call::TopN(top)], &SHARDS).await.unwrap();
    assert_eq!(out[0], QueryValue::Pairs(vec![Pair::new(1, 8), Pair::new(2, 8)]));
}

// ============================================================================
// 3. Mutations reach every replica
// ============================================================================

#[tokio::test]
async fn test_set_bit_is_replicated_and_idempotent() {
    let cluster = TestCluster::new(&HOSTS, 2);
    let set = Call::SetBit(SetBit { frame: "f".into(), row_id: 3, column_id: col(5, 9), timestamp: None });
    let clear = Call::ClearBit(ClearBit { frame: "f".into(), row_id: 3, column_id: col(5, 9) });

    let out = cluster.query("i", vec![set.clone(), set], &[]).await.unwrap();
    assert_eq!(out, vec![QueryValue::Changed(true), QueryValue::Changed(false)]);

    for node in &cluster.nodes {
        let bm = node.storage().bitmap("i", "f", 5, 3).await.unwrap();
        assert_eq!(bm.columns().collect::<Vec<_>>(), vec![col(5, 9)], "replica {}", node.node());
    }

    let out = cluster.query_on(1, "i", vec![clear.clone(), clear], &[]).await.unwrap();
    assert_eq!(out, vec![QueryValue::Changed(true), QueryValue::Changed(false)]);
    for node in &cluster.nodes {
        assert!(node.storage().bitmap("i", "f", 5, 3).await.unwrap().is_empty());
    }
}

// ============================================================================
// 4. Row attributes attach at the coordinator only
// ============================================================================

#[tokio::test]
async fn test_row_attrs_attached_by_coordinator() {
    let cluster = TestCluster::new(&HOSTS, 1);
    cluster.set_bits("i", "f", &[(4, col(0, 1)), (4, col(4, 1))]).await;

    let mut attrs = AttrMap::new();
    attrs.insert("label".into(), AttrValue::from("hot"));
    let set = Call::SetRowAttrs(SetRowAttrs { frame: "f".into(), row_id: 4, attrs: attrs.clone() });
    assert_eq!(cluster.query("i", vec![set], &[]).await.unwrap(), vec![QueryValue::Nil]);

    let out = cluster.query("i", vec![Call::Bitmap(row(4))], &SHARDS).await.unwrap();
    let bm = out[0].clone().into_bitmap().unwrap();
    assert_eq!(bm.count(), 2);
    assert_eq!(bm.attrs, attrs);

    let sub = cluster.nodes[0]
        .execute("i", &[Call::Bitmap(row(4))], &SHARDS, &ExecOptions::remote())
        .await
        .unwrap();
    assert!(sub[0].clone().into_bitmap().unwrap().attrs.is_empty());
}

// ============================================================================
// 5. Bicliques merge across nodes by score
// ============================================================================

#[tokio::test]
async fn test_bicliques_merge_across_nodes() {
    let cluster = TestCluster::new(&HOSTS, 1);
    let owners: Vec<_> = SHARDS.iter().map(|&s| cluster.topology.owning_nodes(s)[0].clone()).collect();
    let a_shard = SHARDS[0];
    let b_shard = SHARDS[owners.iter().position(|n| *n != owners[0]).unwrap()];

    cluster
        .set_bits(
            "i",
            "f",
            &[
                (1, col(a_shard, 1)),
                (1, col(a_shard, 2)),
                (2, col(a_shard, 1)),
                (2, col(a_shard, 2)),
                (5, col(b_shard, 1)),
                (6, col(b_shard, 1)),
                (7, col(b_shard, 1)),
                (5, col(b_shard, 2)),
                (6, col(b_shard, 2)),
                (7, col(b_shard, 2)),
            ],
        )
        .await;

    let call = Call::Bicliques(Bicliques { frame: "f".into(), n: 0 });
    let out = cluster.query("i", vec![call], &SHARDS).await.unwrap();
    assert_eq!(
        out[0],
        QueryValue::Bicliques(vec![Biclique::new([5, 6, 7], 2), Biclique::new([1, 2], 2)])
    );
}

// ============================================================================
// 6. Failures
// ============================================================================

#[tokio::test]
async fn test_unreachable_peer_fails_query() {
    let cluster = TestCluster::new(&HOSTS, 1);
    cluster.set_bits("i", "f", &[(1, col(0, 1))]).await;
    cluster.transport.unregister("b:1");

    let err = cluster.query("i", vec![Call::Count(row(1))], &SHARDS).await.unwrap_err();
    assert!(matches!(err, Error::Remote { ref node, status: None, .. } if node == "b:1"), "{err:?}");
}

#[tokio::test]
async fn test_peer_error_is_reported_with_message() {
    let cluster = TestCluster::new(&HOSTS, 1);
    // The peer's parser has never seen this call.
    let err = cluster.nodes[0]
        .execute("i", &[Call::Count(row(77))], &SHARDS, &ExecOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::Remote { node, status, message } => {
            assert_eq!(node, "b:1");
            assert_eq!(status, Some(200));
            assert!(message.contains("unknown call"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_search_bicliques_reports_failed_shards() {
    let cluster = TestCluster::new(&HOSTS, 1);
    cluster.set_bits("i", "f", &[(1, col(0, 1)), (2, col(0, 1))]).await;
    cluster.transport.unregister("b:1");

    let found = cluster.nodes[0]
        .search_bicliques("i", Bicliques { frame: "f".into(), n: 0 }, &SHARDS, ExecOptions::default())
        .await
        .unwrap();

    assert_eq!(found.bicliques, vec![Biclique::new([1, 2], 1)]);
    assert_eq!(found.failures.len(), 1);
    let failure = &found.failures[0];
    assert_eq!(failure.node.host, "b:1");
    let expected: Vec<u64> = SHARDS
        .iter()
        .copied()
        .filter(|&s| cluster.topology.owning_nodes(s)[0].host == "b:1")
        .collect();
    assert_eq!(failure.shards, expected);
}

// ============================================================================
// 7. Concurrent fan-out
// ============================================================================

#[tokio::test]
async fn test_concurrent_fan_out_matches_sequential() {
    let sequential = TestCluster::new(&HOSTS, 1);
    let concurrent = TestCluster::with_config(&HOSTS, 1, |c| c.max_concurrency = 4);

    let mut bits = Vec::new();
    for &s in &SHARDS {
        for r in 0..4 {
            bits.extend((0..=r + s).map(|i| (r, col(s, i))));
        }
    }
    sequential.set_bits("i", "f", &bits).await;
    concurrent.set_bits("i", "f", &bits).await;

    let calls = vec![
        Call::Count(BitmapCall::Union(vec![row(0), row(3)])),
        Call::TopN(TopN::new("f", 2)),
        Call::Bicliques(Bicliques { frame: "f".into(), n: 3 }),
    ];
    let a = sequential.query("i", calls.clone(), &SHARDS).await.unwrap();
    let b = concurrent.query("i", calls, &SHARDS).await.unwrap();
    assert_eq!(a, b);
}

// ============================================================================
// 8. Implicit shard lists cover shards held only by peers
// ============================================================================

#[tokio::test]
async fn test_empty_shard_list_reaches_peer_only_shards() {
    let cluster = TestCluster::new(&HOSTS, 1);
    let shard = SHARDS
        .iter()
        .copied()
        .filter(|&s| cluster.topology.owning_nodes(s)[0].host == "b:1")
        .max()
        .unwrap();
    assert!(shard >= 2, "need a peer-owned shard beyond the coordinator's range");
    cluster.set_bits("i", "f", &[(1, col(shard, 1))]).await;
    assert_eq!(cluster.node("a:1").storage().max_shard("i").await.unwrap(), 0);

    for coordinator in 0..2 {
        let implicit = cluster.query_on(coordinator, "i", vec![Call::Count(row(1))], &[]).await.unwrap();
        let explicit = cluster.query_on(coordinator, "i", vec![Call::Count(row(1))], &[shard]).await.unwrap();
        assert_eq!(implicit, vec![QueryValue::Count(1)]);
        assert_eq!(implicit, explicit);
    }
}

#[tokio::test]
async fn test_empty_shard_list_fails_when_peer_unreachable() {
    let cluster = TestCluster::new(&HOSTS, 1);
    cluster.transport.unregister("b:1");

    let err = cluster.query("i", vec![Call::Count(row(1))], &[]).await.unwrap_err();
    assert!(matches!(err, Error::Remote { ref node, status: None, .. } if node == "b:1"), "{err:?}");
}
