//! Maximal biclique result records.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Attribute ids forming one side of a biclique. Most bicliques are small.
pub type Tiles = SmallVec<[u64; 8]>;

/// A complete bipartite subgraph: every attribute in `tiles` is held by each
/// of the `count` common entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Biclique {
    pub tiles: Tiles,
    pub count: u64,
    /// `tiles.len() * count`
    pub score: u64,
}

impl Biclique {
    pub fn new(tiles: impl IntoIterator<Item = u64>, count: u64) -> Self {
        let tiles: Tiles = tiles.into_iter().collect();
        let score = tiles.len() as u64 * count;
        Self { tiles, count, score }
    }
}

/// Score descending, then count descending, then tiles ascending
/// (lexicographic), so equal scores still come out in a fixed order.
pub fn sort_bicliques(bicliques: &mut [Biclique]) {
    bicliques.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.count.cmp(&a.count))
            .then_with(|| a.tiles.as_slice().cmp(b.tiles.as_slice()))
    });
}
