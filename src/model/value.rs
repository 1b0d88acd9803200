//! Typed result of evaluating one top-level call.

use super::{Biclique, Bitmap, Pair};
use crate::{Error, Result};

/// The result of a single call. Its shape is fixed by the call's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    /// Bitmap-producing calls.
    Bitmap(Bitmap),
    /// `Count()`.
    Count(u64),
    /// `TopN()`.
    Pairs(Vec<Pair>),
    /// `Bicliques()`.
    Bicliques(Vec<Biclique>),
    /// `SetBit()` / `ClearBit()`.
    Changed(bool),
    /// Attribute writes.
    Nil,
}

impl QueryValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            QueryValue::Bitmap(_) => "BITMAP",
            QueryValue::Count(_) => "COUNT",
            QueryValue::Pairs(_) => "PAIRS",
            QueryValue::Bicliques(_) => "BICLIQUES",
            QueryValue::Changed(_) => "CHANGED",
            QueryValue::Nil => "NIL",
        }
    }

    fn type_error(&self, expected: &str) -> Error {
        Error::TypeError {
            expected: expected.into(),
            got: self.type_name().into(),
        }
    }

    pub fn into_bitmap(self) -> Result<Bitmap> {
        match self {
            QueryValue::Bitmap(bm) => Ok(bm),
            other => Err(other.type_error("BITMAP")),
        }
    }

    pub fn into_count(self) -> Result<u64> {
        match self {
            QueryValue::Count(n) => Ok(n),
            other => Err(other.type_error("COUNT")),
        }
    }

    pub fn into_pairs(self) -> Result<Vec<Pair>> {
        match self {
            QueryValue::Pairs(p) => Ok(p),
            other => Err(other.type_error("PAIRS")),
        }
    }

    pub fn into_bicliques(self) -> Result<Vec<Biclique>> {
        match self {
            QueryValue::Bicliques(b) => Ok(b),
            other => Err(other.type_error("BICLIQUES")),
        }
    }

    pub fn into_changed(self) -> Result<bool> {
        match self {
            QueryValue::Changed(b) => Ok(b),
            other => Err(other.type_error("CHANGED")),
        }
    }
}
