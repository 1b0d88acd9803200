//! Row ranking cache.
//!
//! Keeps per-row column counts for one fragment and a ranked snapshot of them.
//! The snapshot is only recomputed on `invalidate()`, so `top()` may be stale
//! between writes and the next invalidation.

use hashbrown::HashMap;

use crate::model::{sort_pairs, Pair};

/// Default number of ranked rows retained per fragment.
pub const DEFAULT_CACHE_SIZE: usize = 50_000;

/// Ranked candidate list over the rows of one fragment.
pub trait RankingCache: Send + Sync {
    /// Record the current column count of a row. A zero count drops the row.
    fn update(&mut self, id: u64, count: u64);

    /// Recompute the ranking from the recorded counts.
    fn invalidate(&mut self);

    /// Rows by count descending, as of the last invalidation.
    fn top(&self) -> Vec<Pair>;
}

#[derive(Debug, Clone)]
pub struct RankCache {
    counts: HashMap<u64, u64>,
    rankings: Vec<Pair>,
    max_entries: usize,
    dirty: bool,
}

impl RankCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            counts: HashMap::new(),
            rankings: Vec::new(),
            max_entries,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Default for RankCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl RankingCache for RankCache {
    fn update(&mut self, id: u64, count: u64) {
        if count == 0 {
            self.counts.remove(&id);
        } else {
            self.counts.insert(id, count);
        }
        self.dirty = true;
    }

    fn invalidate(&mut self) {
        let mut rankings: Vec<Pair> = self
            .counts
            .iter()
            .map(|(&id, &count)| Pair { id, count })
            .collect();
        sort_pairs(&mut rankings);
        rankings.truncate(self.max_entries);
        self.rankings = rankings;
        self.dirty = false;
    }

    fn top(&self) -> Vec<Pair> {
        self.rankings.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_is_stale_until_invalidated() {
        let mut cache = RankCache::new(10);
        cache.update(1, 3);
        cache.update(2, 9);
        assert!(cache.top().is_empty());
        assert!(cache.is_dirty());

        cache.invalidate();
        assert_eq!(cache.top(), vec![Pair::new(2, 9), Pair::new(1, 3)]);

        cache.update(2, 0);
        assert_eq!(cache.top().len(), 2);
        cache.invalidate();
        assert_eq!(cache.top(), vec![Pair::new(1, 3)]);
    }

    #[test]
    fn test_max_entries_bounds_rankings() {
        let mut cache = RankCache::new(2);
        for id in 0..5 {
            cache.update(id, id + 1);
        }
        cache.invalidate();
        assert_eq!(cache.top(), vec![Pair::new(4, 5), Pair::new(3, 4)]);
    }
}
