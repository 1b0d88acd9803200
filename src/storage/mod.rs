//! # Shard Storage Trait
//!
//! This is THE contract between the executor and the bitmap store. The
//! fragment, ranking-cache and attribute-store collaborators are folded into
//! one trait keyed by `(index, frame, shard)`.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryStorage` | `memory` | In-memory for testing/embedding |

pub mod cache;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::*;
use crate::Result;

pub use cache::{RankCache, RankingCache};
pub use memory::MemoryStorage;

// ============================================================================
// TopN options
// ============================================================================

/// Per-shard ranking request.
#[derive(Debug, Clone, Default)]
pub struct TopOptions {
    /// Pairs to return; 0 returns every candidate.
    pub n: usize,
    /// Count only columns also present in this bitmap.
    pub src: Option<Bitmap>,
    /// Rank exactly these rows instead of the cached ranking.
    pub row_ids: Vec<u64>,
    /// Keep only rows whose attribute `filter_field` is one of `filter_values`.
    pub filter_field: Option<String>,
    pub filter_values: Vec<AttrValue>,
}

// ============================================================================
// ShardStorage Trait
// ============================================================================

/// The storage contract consumed by the executor.
///
/// Missing indexes, frames or fragments are not errors: reads against them
/// return empty results, the way an unwritten shard would.
#[async_trait]
pub trait ShardStorage: Send + Sync + 'static {
    // ========================================================================
    // Shape
    // ========================================================================

    /// Highest shard holding data for `index` (0 when empty).
    async fn max_shard(&self, index: &str) -> Result<u64>;

    // ========================================================================
    // Fragment reads
    // ========================================================================

    /// One row of a frame within a shard.
    async fn bitmap(&self, index: &str, frame: &str, shard: u64, row_id: u64) -> Result<Bitmap>;

    /// One row restricted to bits written within `[start, end)`.
    async fn range(
        &self,
        index: &str,
        frame: &str,
        shard: u64,
        row_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Bitmap>;

    /// Ranked rows of a fragment.
    async fn top(&self, index: &str, frame: &str, shard: u64, opt: &TopOptions)
        -> Result<Vec<Pair>>;

    /// Invalidate the fragment's ranking cache, then return its ranked rows
    /// together with their bitmaps.
    async fn ranked_candidates(&self, index: &str, frame: &str, shard: u64)
        -> Result<Vec<BitmapPair>>;

    // ========================================================================
    // Fragment writes
    // ========================================================================

    /// Set a bit in the shard owning `column_id`. With a timestamp, the bit is
    /// also written to the time views of `quantum`. Returns true if changed.
    async fn set_bit(
        &self,
        index: &str,
        frame: &str,
        row_id: u64,
        column_id: u64,
        timestamp: Option<DateTime<Utc>>,
        quantum: TimeQuantum,
    ) -> Result<bool>;

    /// Clear a bit. Returns true if it was set.
    async fn clear_bit(&self, index: &str, frame: &str, row_id: u64, column_id: u64)
        -> Result<bool>;

    // ========================================================================
    // Attribute stores
    // ========================================================================

    async fn row_attrs(&self, index: &str, frame: &str, row_id: u64) -> Result<AttrMap>;

    /// Merge `attrs` into the row's attributes.
    async fn set_row_attrs(&self, index: &str, frame: &str, row_id: u64, attrs: AttrMap)
        -> Result<()>;

    async fn column_attrs(&self, index: &str, column_id: u64) -> Result<AttrMap>;

    /// Merge `attrs` into the column's attributes.
    async fn set_column_attrs(&self, index: &str, column_id: u64, attrs: AttrMap) -> Result<()>;
}
