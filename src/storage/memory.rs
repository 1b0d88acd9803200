//! In-memory shard storage.
//!
//! This is the reference implementation of `ShardStorage`.
//! It uses simple HashMaps protected by RwLock.
//!
//! ## Limitations
//!
//! - **No persistence**: everything lives for the lifetime of the value.
//! - **Coarse locking**: one lock per collection. Writes to different
//!   fragments still serialize on the fragment map.
//! - **Time views keyed by the frame's last quantum**: `Range()` reads the
//!   views of the quantum most recently used to write the frame.
//!
//! Use this backend for:
//! - Testing the executor, router and biclique engine
//! - Embedding several nodes in one process behind a loopback transport

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::cache::{RankCache, RankingCache};
use super::{ShardStorage, TopOptions};
use crate::model::*;
use crate::Result;

// ============================================================================
// Fragment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FragmentKey {
    index: String,
    frame: String,
    shard: u64,
}

impl FragmentKey {
    fn new(index: &str, frame: &str, shard: u64) -> Self {
        Self { index: index.to_string(), frame: frame.to_string(), shard }
    }
}

/// One shard of one frame: view name → row id → bits.
#[derive(Debug, Default)]
struct Fragment {
    views: HashMap<String, HashMap<u64, Bitmap>>,
    cache: RankCache,
}

impl Fragment {
    fn row(&self, view: &str, row_id: u64) -> Option<&Bitmap> {
        self.views.get(view).and_then(|rows| rows.get(&row_id))
    }

    fn set_bit(&mut self, view: &str, row_id: u64, column_id: u64) -> bool {
        self.views
            .entry_ref(view)
            .or_default()
            .entry(row_id)
            .or_default()
            .insert(column_id)
    }

    fn clear_bit(&mut self, view: &str, row_id: u64, column_id: u64) -> bool {
        self.views
            .get_mut(view)
            .and_then(|rows| rows.get_mut(&row_id))
            .is_some_and(|bm| bm.remove(column_id))
    }

    fn standard_count(&self, row_id: u64) -> u64 {
        self.row(STANDARD_VIEW, row_id).map_or(0, Bitmap::count)
    }

    fn refresh_cache(&mut self) {
        if self.cache.is_dirty() {
            self.cache.invalidate();
        }
    }
}

// ============================================================================
// MemoryStorage
// ============================================================================

/// In-memory sharded bitmap storage.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    fragments: RwLock<HashMap<FragmentKey, Fragment>>,
    /// (index, frame, row) → attributes
    row_attrs: RwLock<HashMap<(String, String, u64), AttrMap>>,
    /// (index, column) → attributes
    column_attrs: RwLock<HashMap<(String, u64), AttrMap>>,
    max_shards: RwLock<HashMap<String, u64>>,
    /// (index, frame) → quantum the frame's time views were written with
    quantums: RwLock<HashMap<(String, String), TimeQuantum>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the time quantum of a frame ahead of any timestamped write.
    pub fn set_frame_quantum(&self, index: &str, frame: &str, quantum: TimeQuantum) {
        self.inner
            .quantums
            .write()
            .insert((index.to_string(), frame.to_string()), quantum);
    }

    fn row_matches_filter(&self, index: &str, frame: &str, row_id: u64, opt: &TopOptions) -> bool {
        let Some(field) = &opt.filter_field else {
            return true;
        };
        let attrs = self.inner.row_attrs.read();
        attrs
            .get(&(index.to_string(), frame.to_string(), row_id))
            .and_then(|a| a.get(field))
            .is_some_and(|v| opt.filter_values.contains(v))
    }
}

fn merge_attrs(target: &mut AttrMap, attrs: AttrMap) {
    for (k, v) in attrs {
        target.insert(k, v);
    }
}

// ============================================================================
// ShardStorage impl
// ============================================================================

#[async_trait]
impl ShardStorage for MemoryStorage {
    async fn max_shard(&self, index: &str) -> Result<u64> {
        Ok(self.inner.max_shards.read().get(index).copied().unwrap_or(0))
    }

    async fn bitmap(&self, index: &str, frame: &str, shard: u64, row_id: u64) -> Result<Bitmap> {
        let fragments = self.inner.fragments.read();
        Ok(fragments
            .get(&FragmentKey::new(index, frame, shard))
            .and_then(|f| f.row(STANDARD_VIEW, row_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn range(
        &self,
        index: &str,
        frame: &str,
        shard: u64,
        row_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Bitmap> {
        let quantum = self
            .inner
            .quantums
            .read()
            .get(&(index.to_string(), frame.to_string()))
            .copied()
            .unwrap_or_default();

        let fragments = self.inner.fragments.read();
        let Some(fragment) = fragments.get(&FragmentKey::new(index, frame, shard)) else {
            return Ok(Bitmap::new());
        };

        let mut result = Bitmap::new();
        for view in views_by_time_range(STANDARD_VIEW, start, end, quantum) {
            if let Some(bm) = fragment.row(&view, row_id) {
                result.merge(bm);
            }
        }
        Ok(result)
    }

    async fn top(
        &self,
        index: &str,
        frame: &str,
        shard: u64,
        opt: &TopOptions,
    ) -> Result<Vec<Pair>> {
        let mut fragments = self.inner.fragments.write();
        let Some(fragment) = fragments.get_mut(&FragmentKey::new(index, frame, shard)) else {
            return Ok(Vec::new());
        };
        fragment.refresh_cache();

        let candidates: Vec<u64> = if opt.row_ids.is_empty() {
            fragment.cache.top().into_iter().map(|p| p.id).collect()
        } else {
            opt.row_ids.clone()
        };

        let mut pairs = Vec::new();
        for row_id in candidates {
            if !self.row_matches_filter(index, frame, row_id, opt) {
                continue;
            }
            let Some(row) = fragment.row(STANDARD_VIEW, row_id) else {
                continue;
            };
            let count = match &opt.src {
                Some(src) => row.intersection_count(src),
                None => row.count(),
            };
            if count > 0 {
                pairs.push(Pair::new(row_id, count));
            }
        }

        sort_pairs(&mut pairs);
        if opt.n > 0 && pairs.len() > opt.n {
            pairs.truncate(opt.n);
        }
        Ok(pairs)
    }

    async fn ranked_candidates(
        &self,
        index: &str,
        frame: &str,
        shard: u64,
    ) -> Result<Vec<BitmapPair>> {
        let mut fragments = self.inner.fragments.write();
        let Some(fragment) = fragments.get_mut(&FragmentKey::new(index, frame, shard)) else {
            return Ok(Vec::new());
        };
        fragment.cache.invalidate();

        Ok(fragment
            .cache
            .top()
            .into_iter()
            .filter_map(|p| {
                fragment
                    .row(STANDARD_VIEW, p.id)
                    .map(|bm| BitmapPair::new(p.id, bm.clone()))
            })
            .collect())
    }

    async fn set_bit(
        &self,
        index: &str,
        frame: &str,
        row_id: u64,
        column_id: u64,
        timestamp: Option<DateTime<Utc>>,
        quantum: TimeQuantum,
    ) -> Result<bool> {
        let shard = shard_of(column_id);

        if timestamp.is_some() && quantum != TimeQuantum::None {
            self.set_frame_quantum(index, frame, quantum);
        }

        let changed = {
            let mut fragments = self.inner.fragments.write();
            let fragment = fragments.entry(FragmentKey::new(index, frame, shard)).or_default();

            let changed = fragment.set_bit(STANDARD_VIEW, row_id, column_id);
            if let Some(ts) = timestamp {
                for view in views_by_time(STANDARD_VIEW, ts, quantum) {
                    fragment.set_bit(&view, row_id, column_id);
                }
            }
            let count = fragment.standard_count(row_id);
            fragment.cache.update(row_id, count);
            changed
        };

        let mut max_shards = self.inner.max_shards.write();
        let max = max_shards.entry_ref(index).or_insert(0);
        *max = (*max).max(shard);

        Ok(changed)
    }

    async fn clear_bit(
        &self,
        index: &str,
        frame: &str,
        row_id: u64,
        column_id: u64,
    ) -> Result<bool> {
        let mut fragments = self.inner.fragments.write();
        let Some(fragment) =
            fragments.get_mut(&FragmentKey::new(index, frame, shard_of(column_id)))
        else {
            return Ok(false);
        };

        let changed = fragment.clear_bit(STANDARD_VIEW, row_id, column_id);
        let views: Vec<String> = fragment
            .views
            .keys()
            .filter(|v| v.as_str() != STANDARD_VIEW)
            .cloned()
            .collect();
        for view in views {
            fragment.clear_bit(&view, row_id, column_id);
        }
        let count = fragment.standard_count(row_id);
        fragment.cache.update(row_id, count);
        Ok(changed)
    }

    async fn row_attrs(&self, index: &str, frame: &str, row_id: u64) -> Result<AttrMap> {
        Ok(self
            .inner
            .row_attrs
            .read()
            .get(&(index.to_string(), frame.to_string(), row_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_row_attrs(
        &self,
        index: &str,
        frame: &str,
        row_id: u64,
        attrs: AttrMap,
    ) -> Result<()> {
        let mut all = self.inner.row_attrs.write();
        let target = all
            .entry((index.to_string(), frame.to_string(), row_id))
            .or_default();
        merge_attrs(target, attrs);
        Ok(())
    }

    async fn column_attrs(&self, index: &str, column_id: u64) -> Result<AttrMap> {
        Ok(self
            .inner
            .column_attrs
            .read()
            .get(&(index.to_string(), column_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_column_attrs(&self, index: &str, column_id: u64, attrs: AttrMap) -> Result<()> {
        let mut all = self.inner.column_attrs.write();
        let target = all.entry((index.to_string(), column_id)).or_default();
        merge_attrs(target, attrs);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
