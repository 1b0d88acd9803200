//! Ranked (id, count) pairs returned by `TopN()`.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// A row id together with its (possibly approximate) column count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub id: u64,
    pub count: u64,
}

impl Pair {
    pub fn new(id: u64, count: u64) -> Self {
        Self { id, count }
    }
}

/// Accumulates pairs from several shards, summing counts per id.
#[derive(Debug, Clone, Default)]
pub struct PairSet {
    counts: HashMap<u64, u64>,
}

impl PairSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pairs: impl IntoIterator<Item = Pair>) {
        for p in pairs {
            *self.counts.entry(p.id).or_insert(0) += p.count;
        }
    }

    /// Sorted pairs, truncated to `n` when `n > 0`.
    pub fn into_ranked(self, n: usize) -> Vec<Pair> {
        let mut pairs: Vec<Pair> = self
            .counts
            .into_iter()
            .map(|(id, count)| Pair { id, count })
            .collect();
        sort_pairs(&mut pairs);
        if n > 0 && pairs.len() > n {
            pairs.truncate(n);
        }
        pairs
    }
}

/// Count descending; equal counts ordered by ascending id.
pub fn sort_pairs(pairs: &mut [Pair]) {
    pairs.sort_unstable_by(|a, b| b.count.cmp(&a.count).then(a.id.cmp(&b.id)));
}

/// Ids of `pairs` in ascending order.
pub fn pair_ids(pairs: &[Pair]) -> Vec<u64> {
    let mut ids: Vec<u64> = pairs.iter().map(|p| p.id).collect();
    ids.sort_unstable();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_sums_counts_and_truncates() {
        let mut set = PairSet::new();
        set.add([Pair::new(1, 5), Pair::new(2, 3)]);
        set.add([Pair::new(1, 2)]);

        assert_eq!(set.clone().into_ranked(1), vec![Pair::new(1, 7)]);
        assert_eq!(set.into_ranked(0), vec![Pair::new(1, 7), Pair::new(2, 3)]);
    }

    #[test]
    fn test_equal_counts_break_ties_by_id() {
        let mut pairs = vec![Pair::new(9, 4), Pair::new(3, 4), Pair::new(5, 8)];
        sort_pairs(&mut pairs);
        assert_eq!(pairs, vec![Pair::new(5, 8), Pair::new(3, 4), Pair::new(9, 4)]);
    }
}
