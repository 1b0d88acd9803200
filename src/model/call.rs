//! Typed query call tree.
//!
//! These types are what a parser produces and what the executor walks. They
//! are pure data. `Display` renders a call back to PQL text, which is how a
//! sub-query travels to a peer node.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attr::{format_attrs, AttrMap, AttrValue};

/// Frame used when a call does not name one.
pub const DEFAULT_FRAME: &str = "general";

/// Timestamp layout used in PQL arguments.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// A call that evaluates to a bitmap for every shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BitmapCall {
    /// One row of a frame.
    Bitmap { frame: String, row_id: u64 },
    /// One row restricted to bits written within `[start, end)`.
    Range {
        frame: String,
        row_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Union(Vec<BitmapCall>),
    Intersect(Vec<BitmapCall>),
    Difference(Vec<BitmapCall>),
}

impl BitmapCall {
    pub fn bitmap(frame: impl Into<String>, row_id: u64) -> Self {
        BitmapCall::Bitmap { frame: frame.into(), row_id }
    }

    pub fn range(
        frame: impl Into<String>,
        row_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        BitmapCall::Range { frame: frame.into(), row_id, start, end }
    }
}

/// `TopN()`: rows ranked by column count, optionally intersected with `src`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopN {
    pub frame: String,
    /// Number of pairs to keep; 0 keeps all.
    pub n: usize,
    pub src: Option<Box<BitmapCall>>,
    /// Restrict ranking to these rows.
    pub row_ids: Vec<u64>,
    /// Row attribute to filter on, with `filters` as its allowed values.
    pub field: Option<String>,
    pub filters: Vec<AttrValue>,
}

impl TopN {
    pub fn new(frame: impl Into<String>, n: usize) -> Self {
        Self {
            frame: frame.into(),
            n,
            src: None,
            row_ids: Vec::new(),
            field: None,
            filters: Vec::new(),
        }
    }

    pub fn with_src(mut self, src: BitmapCall) -> Self {
        self.src = Some(Box::new(src));
        self
    }

    pub fn with_row_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.row_ids = ids.into_iter().collect();
        self
    }

    pub fn with_filter(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = AttrValue>,
    ) -> Self {
        self.field = Some(field.into());
        self.filters = values.into_iter().collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetBit {
    pub frame: String,
    pub row_id: u64,
    pub column_id: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearBit {
    pub frame: String,
    pub row_id: u64,
    pub column_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRowAttrs {
    pub frame: String,
    pub row_id: u64,
    pub attrs: AttrMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetColumnAttrs {
    pub column_id: u64,
    pub attrs: AttrMap,
}

/// `Bicliques()`: maximal bicliques among the top `n` ranked rows of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bicliques {
    pub frame: String,
    /// Size of the candidate universe per shard; 0 uses every ranked row.
    pub n: usize,
}

/// A top-level query call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    Bitmap(BitmapCall),
    Count(BitmapCall),
    TopN(TopN),
    SetBit(SetBit),
    ClearBit(ClearBit),
    SetRowAttrs(SetRowAttrs),
    SetColumnAttrs(SetColumnAttrs),
    Bicliques(Bicliques),
}

// ============================================================================
// PQL rendering
// ============================================================================

fn fmt_time(t: &DateTime<Utc>) -> String {
    t.format(TIME_FORMAT).to_string()
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for BitmapCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitmapCall::Bitmap { frame, row_id } => {
                write!(f, "Bitmap(id={row_id}, frame={frame})")
            }
            BitmapCall::Range { frame, row_id, start, end } => write!(
                f,
                "Range(id={row_id}, frame={frame}, start=\"{}\", end=\"{}\")",
                fmt_time(start),
                fmt_time(end)
            ),
            BitmapCall::Union(inputs) => write!(f, "Union({})", join(inputs)),
            BitmapCall::Intersect(inputs) => write!(f, "Intersect({})", join(inputs)),
            BitmapCall::Difference(inputs) => write!(f, "Difference({})", join(inputs)),
        }
    }
}

impl fmt::Display for TopN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = Vec::new();
        if let Some(src) = &self.src {
            args.push(src.to_string());
        }
        args.push(format!("frame={}", self.frame));
        args.push(format!("n={}", self.n));
        if !self.row_ids.is_empty() {
            args.push(format!("ids=[{}]", join(&self.row_ids)));
        }
        if let Some(field) = &self.field {
            args.push(format!("field={field:?}"));
            args.push(format!("filters=[{}]", join(&self.filters)));
        }
        write!(f, "TopN({})", args.join(", "))
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Bitmap(c) => write!(f, "{c}"),
            Call::Count(c) => write!(f, "Count({c})"),
            Call::TopN(c) => write!(f, "{c}"),
            Call::SetBit(c) => {
                write!(f, "SetBit(id={}, frame={}, col={}", c.row_id, c.frame, c.column_id)?;
                if let Some(ts) = &c.timestamp {
                    write!(f, ", timestamp=\"{}\"", fmt_time(ts))?;
                }
                write!(f, ")")
            }
            Call::ClearBit(c) => {
                write!(f, "ClearBit(id={}, frame={}, col={})", c.row_id, c.frame, c.column_id)
            }
            Call::SetRowAttrs(c) => {
                write!(f, "SetRowAttrs(id={}, frame={}", c.row_id, c.frame)?;
                if !c.attrs.is_empty() {
                    write!(f, ", {}", format_attrs(&c.attrs))?;
                }
                write!(f, ")")
            }
            Call::SetColumnAttrs(c) => {
                write!(f, "SetColumnAttrs(id={}", c.column_id)?;
                if !c.attrs.is_empty() {
                    write!(f, ", {}", format_attrs(&c.attrs))?;
                }
                write!(f, ")")
            }
            Call::Bicliques(c) => write!(f, "Bicliques(frame={}, n={})", c.frame, c.n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_nested_bitmap_calls() {
        let call = Call::Count(BitmapCall::Intersect(vec![
            BitmapCall::bitmap("f", 10),
            BitmapCall::Union(vec![BitmapCall::bitmap("f", 11), BitmapCall::bitmap("g", 12)]),
        ]));
        assert_eq!(
            call.to_string(),
            "Count(Intersect(Bitmap(id=10, frame=f), Union(Bitmap(id=11, frame=f), Bitmap(id=12, frame=g))))"
        );
    }

    #[test]
    fn test_render_range_and_topn() {
        let start = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2017, 3, 2, 3, 0, 0).unwrap();
        assert_eq!(
            BitmapCall::range("ts", 1, start, end).to_string(),
            "Range(id=1, frame=ts, start=\"2010-01-01T00:00\", end=\"2017-03-02T03:00\")"
        );

        let top = TopN::new("f", 3)
            .with_src(BitmapCall::bitmap("other", 100))
            .with_row_ids([0, 10, 30])
            .with_filter("category", [AttrValue::from("a"), AttrValue::from(7u64)]);
        assert_eq!(
            Call::TopN(top).to_string(),
            "TopN(Bitmap(id=100, frame=other), frame=f, n=3, ids=[0, 10, 30], field=\"category\", filters=[\"a\", 7])"
        );
    }

    #[test]
    fn test_render_writes() {
        let mut attrs = AttrMap::new();
        attrs.insert("active".into(), AttrValue::Bool(true));
        attrs.insert("name".into(), AttrValue::from("x"));
        let call = Call::SetRowAttrs(SetRowAttrs { frame: "f".into(), row_id: 3, attrs });
        assert_eq!(call.to_string(), "SetRowAttrs(id=3, frame=f, active=true, name=\"x\")");

        let call = Call::Bicliques(Bicliques { frame: DEFAULT_FRAME.into(), n: 50 });
        assert_eq!(call.to_string(), "Bicliques(frame=general, n=50)");
    }
}
