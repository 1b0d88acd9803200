//! Bitmap over entity (column) ids.
//!
//! The container itself is `roaring::RoaringTreemap`; this wrapper adds the
//! attribute map that top-level `Bitmap()` results carry and exposes exactly
//! the set operations the executor needs.

use std::fmt;

use roaring::RoaringTreemap;

use super::AttrMap;
use crate::Result;

/// A set of column ids, optionally decorated with row attributes.
#[derive(Clone, Default, PartialEq)]
pub struct Bitmap {
    bits: RoaringTreemap,
    pub attrs: AttrMap,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bits(bits: RoaringTreemap) -> Self {
        Self { bits, attrs: AttrMap::new() }
    }

    /// Set a bit. Returns true if the bit was not already set.
    pub fn insert(&mut self, column: u64) -> bool {
        self.bits.insert(column)
    }

    /// Clear a bit. Returns true if the bit was set.
    pub fn remove(&mut self, column: u64) -> bool {
        self.bits.remove(column)
    }

    pub fn contains(&self, column: u64) -> bool {
        self.bits.contains(column)
    }

    /// Cardinality.
    pub fn count(&self) -> u64 {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn union(&self, other: &Bitmap) -> Bitmap {
        Bitmap::from_bits(&self.bits | &other.bits)
    }

    pub fn intersect(&self, other: &Bitmap) -> Bitmap {
        Bitmap::from_bits(&self.bits & &other.bits)
    }

    pub fn difference(&self, other: &Bitmap) -> Bitmap {
        Bitmap::from_bits(&self.bits - &other.bits)
    }

    /// Cardinality of the intersection without materializing it.
    pub fn intersection_count(&self, other: &Bitmap) -> u64 {
        self.bits.intersection_len(&other.bits)
    }

    /// In-place union.
    pub fn merge(&mut self, other: &Bitmap) {
        self.bits |= &other.bits;
    }

    pub fn columns(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits.iter()
    }

    pub fn bits(&self) -> &RoaringTreemap {
        &self.bits
    }

    /// Portable roaring serialization of the bits (attributes excluded).
    pub fn serialize_bits(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.bits.serialized_size());
        self.bits.serialize_into(&mut buf)?;
        Ok(buf)
    }

    pub fn deserialize_bits(buf: &[u8]) -> Result<Self> {
        Ok(Self::from_bits(RoaringTreemap::deserialize_from(buf)?))
    }
}

impl FromIterator<u64> for Bitmap {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Bitmap::from_bits(iter.into_iter().collect())
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("columns", &self.bits.iter().collect::<Vec<_>>())
            .field("attrs", &self.attrs)
            .finish()
    }
}

/// An attribute (row) together with its neighbour set: one vertex on the
/// attribute side of the bipartite attribute × entity graph.
#[derive(Debug, Clone, PartialEq)]
pub struct BitmapPair {
    pub id: u64,
    pub bitmap: Bitmap,
}

impl BitmapPair {
    pub fn new(id: u64, bitmap: Bitmap) -> Self {
        Self { id, bitmap }
    }
}
