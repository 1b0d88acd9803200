//! # Query Model
//!
//! Clean DTOs shared by the executor, the storage contract and the wire codec.
//!
//! Design rule: this module is pure data. No I/O, no state, no async.

pub mod attr;
pub mod bitmap;
pub mod biclique;
pub mod call;
pub mod pair;
pub mod quantum;
pub mod value;

pub use attr::{AttrMap, AttrValue};
pub use bitmap::{Bitmap, BitmapPair};
pub use biclique::{sort_bicliques, Biclique, Tiles};
pub use call::{
    BitmapCall, Bicliques, Call, ClearBit, SetBit, SetColumnAttrs, SetRowAttrs, TopN,
    DEFAULT_FRAME,
};
pub use pair::{pair_ids, sort_pairs, Pair, PairSet};
pub use quantum::{views_by_time, views_by_time_range, TimeQuantum, STANDARD_VIEW};
pub use value::QueryValue;

/// Number of columns per shard.
pub const SHARD_WIDTH: u64 = 1 << 20;

/// Shard owning `column`.
pub fn shard_of(column: u64) -> u64 {
    column / SHARD_WIDTH
}
