//! Maximal biclique discovery.
//!
//! `search` enumerates maximal bicliques over a ranked candidate universe;
//! `stream` runs that enumeration as a bounded, cancellable pipeline that
//! yields scored `Biclique` records.

pub mod search;
pub mod stream;

pub use search::{find_bicliques, RawBiclique};
pub use stream::{BicliqueStream, PIPELINE_CAPACITY};

use crate::model::BitmapPair;

/// Restrict a ranked candidate list to its first `n` entries (0 keeps all).
pub fn candidate_universe(mut ranked: Vec<BitmapPair>, n: usize) -> Vec<BitmapPair> {
    if n > 0 && n < ranked.len() {
        ranked.truncate(n);
    }
    ranked
}
