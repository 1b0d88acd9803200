//! Descriptive attributes attached to rows (attributes) and columns (entities).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    String(String),
    Uint(u64),
    Bool(bool),
}

/// Attribute name → value, kept in key order so rendering and encoding are stable.
pub type AttrMap = BTreeMap<String, AttrValue>;

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::String(_) => "STRING",
            AttrValue::Uint(_) => "UINT",
            AttrValue::Bool(_) => "BOOL",
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => write!(f, "{s:?}"),
            AttrValue::Uint(n) => write!(f, "{n}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::String(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::String(s)
    }
}

impl From<u64> for AttrValue {
    fn from(n: u64) -> Self {
        AttrValue::Uint(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

/// Render an attribute map as PQL arguments: `a=1, b="x"`.
pub(crate) fn format_attrs(attrs: &AttrMap) -> String {
    attrs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
