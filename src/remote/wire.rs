//! Binary request/response messages for remote query execution.
//!
//! Protobuf messages derived with `prost` (repeated scalars written
//! unpacked, packed or unpacked accepted on read, unknown fields skipped).
//! Results carry no type tags: their shape is recovered from the kind of the
//! call at the same position in the request's query.
//!
//! ```text
//! QueryRequest  { 1: index, 2: query, 3: shards*, 5: timestamp, 6: quantum, 7: remote }
//! QueryResponse { 1: err, 2: results* }
//! QueryResult   { 1: Bitmap, 2: n, 3: Pair*, 4: changed, 5: Biclique* }
//! Bitmap        { 1: roaring bits, 2: Attr* }
//! Attr          { 1: key, 2: string, 3: uint, 4: bool }
//! Pair          { 1: id, 2: count }
//! Biclique      { 1: tiles*, 2: count, 3: score }
//!
//! MaxShardRequest  { 1: index }
//! MaxShardResponse { 1: err, 2: max_shard }
//! ```

use prost::{Message, Oneof};

use crate::model::{self, AttrMap, AttrValue, Call, QueryValue};
use crate::{Error, Result};

// ============================================================================
// Messages
// ============================================================================

#[derive(Clone, PartialEq, Message)]
pub struct QueryRequest {
    #[prost(string, tag = "1")]
    pub index: String,
    /// PQL text of the calls to run.
    #[prost(string, tag = "2")]
    pub query: String,
    #[prost(uint64, repeated, packed = "false", tag = "3")]
    pub shards: Vec<u64>,
    /// Unix nanoseconds.
    #[prost(int64, optional, tag = "5")]
    pub timestamp: Option<i64>,
    #[prost(uint32, tag = "6")]
    pub quantum: u32,
    /// Set when the sender is itself executing a query and delegating shards.
    #[prost(bool, tag = "7")]
    pub remote: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryResponse {
    /// Non-empty on failure.
    #[prost(string, tag = "1")]
    pub err: String,
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<QueryResult>,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryResult {
    #[prost(message, optional, tag = "1")]
    pub bitmap: Option<Bitmap>,
    #[prost(uint64, optional, tag = "2")]
    pub n: Option<u64>,
    #[prost(message, repeated, tag = "3")]
    pub pairs: Vec<Pair>,
    #[prost(bool, optional, tag = "4")]
    pub changed: Option<bool>,
    #[prost(message, repeated, tag = "5")]
    pub bicliques: Vec<Biclique>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Bitmap {
    /// Portable roaring serialization.
    #[prost(bytes = "vec", tag = "1")]
    pub bits: Vec<u8>,
    #[prost(message, repeated, tag = "2")]
    pub attrs: Vec<Attr>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Attr {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(oneof = "AttrKind", tags = "2, 3, 4")]
    pub value: Option<AttrKind>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum AttrKind {
    #[prost(string, tag = "2")]
    String(String),
    #[prost(uint64, tag = "3")]
    Uint(u64),
    #[prost(bool, tag = "4")]
    Bool(bool),
}

#[derive(Clone, PartialEq, Message)]
pub struct Pair {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub count: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct Biclique {
    #[prost(uint64, repeated, packed = "false", tag = "1")]
    pub tiles: Vec<u64>,
    #[prost(uint64, tag = "2")]
    pub count: u64,
    #[prost(uint64, tag = "3")]
    pub score: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct MaxShardRequest {
    #[prost(string, tag = "1")]
    pub index: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct MaxShardResponse {
    #[prost(string, tag = "1")]
    pub err: String,
    #[prost(uint64, tag = "2")]
    pub max_shard: u64,
}

impl QueryResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self { err: message.into(), results: Vec::new() }
    }
}

// ============================================================================
// Model conversions
// ============================================================================

impl From<&model::Pair> for Pair {
    fn from(p: &model::Pair) -> Self {
        Self { id: p.id, count: p.count }
    }
}

impl From<Pair> for model::Pair {
    fn from(p: Pair) -> Self {
        model::Pair::new(p.id, p.count)
    }
}

impl From<&model::Biclique> for Biclique {
    fn from(bc: &model::Biclique) -> Self {
        Self { tiles: bc.tiles.to_vec(), count: bc.count, score: bc.score }
    }
}

impl From<Biclique> for model::Biclique {
    fn from(bc: Biclique) -> Self {
        model::Biclique { tiles: bc.tiles.into_iter().collect(), count: bc.count, score: bc.score }
    }
}

impl From<&AttrValue> for AttrKind {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::String(s) => AttrKind::String(s.clone()),
            AttrValue::Uint(n) => AttrKind::Uint(*n),
            AttrValue::Bool(b) => AttrKind::Bool(*b),
        }
    }
}

impl From<AttrKind> for AttrValue {
    fn from(kind: AttrKind) -> Self {
        match kind {
            AttrKind::String(s) => AttrValue::String(s),
            AttrKind::Uint(n) => AttrValue::Uint(n),
            AttrKind::Bool(b) => AttrValue::Bool(b),
        }
    }
}

impl TryFrom<&model::Bitmap> for Bitmap {
    type Error = Error;

    fn try_from(bm: &model::Bitmap) -> Result<Self> {
        Ok(Self {
            bits: bm.serialize_bits()?,
            attrs: bm
                .attrs
                .iter()
                .map(|(k, v)| Attr { key: k.clone(), value: Some(v.into()) })
                .collect(),
        })
    }
}

impl TryFrom<Bitmap> for model::Bitmap {
    type Error = Error;

    fn try_from(bm: Bitmap) -> Result<Self> {
        let mut bitmap = model::Bitmap::deserialize_bits(&bm.bits)
            .map_err(|e| Error::Protocol(format!("invalid bitmap: {e}")))?;
        let mut attrs = AttrMap::new();
        for attr in bm.attrs {
            let value = attr
                .value
                .ok_or_else(|| Error::Protocol(format!("attr {:?} has no value", attr.key)))?;
            attrs.insert(attr.key, value.into());
        }
        bitmap.attrs = attrs;
        Ok(bitmap)
    }
}

impl QueryResult {
    pub fn from_value(value: &QueryValue) -> Result<Self> {
        let mut result = QueryResult::default();
        match value {
            QueryValue::Bitmap(bm) => result.bitmap = Some(bm.try_into()?),
            QueryValue::Count(n) => result.n = Some(*n),
            QueryValue::Pairs(pairs) => result.pairs = pairs.iter().map(Pair::from).collect(),
            QueryValue::Bicliques(bcs) => result.bicliques = bcs.iter().map(Biclique::from).collect(),
            QueryValue::Changed(changed) => result.changed = Some(*changed),
            QueryValue::Nil => {}
        }
        Ok(result)
    }

    /// Interpret this result as the output of `call`.
    pub fn into_value(self, call: &Call) -> Result<QueryValue> {
        Ok(match call {
            Call::Bitmap(_) => match self.bitmap {
                Some(bm) => QueryValue::Bitmap(bm.try_into()?),
                None => QueryValue::Bitmap(model::Bitmap::new()),
            },
            Call::Count(_) => QueryValue::Count(self.n.unwrap_or(0)),
            Call::TopN(_) => QueryValue::Pairs(self.pairs.into_iter().map(Into::into).collect()),
            Call::Bicliques(_) => {
                QueryValue::Bicliques(self.bicliques.into_iter().map(Into::into).collect())
            }
            Call::SetBit(_) | Call::ClearBit(_) => {
                QueryValue::Changed(self.changed.unwrap_or(false))
            }
            Call::SetRowAttrs(_) | Call::SetColumnAttrs(_) => QueryValue::Nil,
        })
    }
}

/// Decode a response's results positionally against the calls that produced them.
pub fn decode_results(calls: &[Call], results: Vec<QueryResult>) -> Result<Vec<QueryValue>> {
    if results.len() != calls.len() {
        return Err(Error::Protocol(format!(
            "expected {} results, got {}",
            calls.len(),
            results.len()
        )));
    }
    results
        .into_iter()
        .zip(calls)
        .map(|(r, call)| r.into_value(call))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BitmapCall, Bicliques, ClearBit, SetBit, SetColumnAttrs, SetRowAttrs, TimeQuantum, TopN,
    };
    use pretty_assertions::assert_eq;

    fn every_kind() -> (Vec<Call>, Vec<QueryValue>) {
        let mut bm: model::Bitmap = [1, 2, 1 << 21].into_iter().collect();
        bm.attrs.insert("name".into(), AttrValue::from("x"));
        bm.attrs.insert("rank".into(), AttrValue::Uint(3));
        bm.attrs.insert("on".into(), AttrValue::Bool(false));

        let calls = vec![
            Call::Bitmap(BitmapCall::bitmap("f", 1)),
            Call::Count(BitmapCall::bitmap("f", 1)),
            Call::TopN(TopN::new("f", 2)),
            Call::SetBit(SetBit { frame: "f".into(), row_id: 1, column_id: 2, timestamp: None }),
            Call::ClearBit(ClearBit { frame: "f".into(), row_id: 1, column_id: 2 }),
            Call::SetRowAttrs(SetRowAttrs { frame: "f".into(), row_id: 1, attrs: AttrMap::new() }),
            Call::SetColumnAttrs(SetColumnAttrs { column_id: 2, attrs: AttrMap::new() }),
            Call::Bicliques(Bicliques { frame: "f".into(), n: 5 }),
        ];
        let values = vec![
            QueryValue::Bitmap(bm),
            QueryValue::Count(7),
            QueryValue::Pairs(vec![model::Pair::new(1, 7), model::Pair::new(300, 2)]),
            QueryValue::Changed(true),
            QueryValue::Changed(false),
            QueryValue::Nil,
            QueryValue::Nil,
            QueryValue::Bicliques(vec![model::Biclique::new([1, 2], 2), model::Biclique::new([3], 2)]),
        ];
        (calls, values)
    }

    #[test]
    fn test_request_survives_encoding() {
        let req = QueryRequest {
            index: "i".into(),
            query: "Count(Bitmap(id=1, frame=f))".into(),
            shards: vec![0, 3, 1 << 40],
            timestamp: Some(-1_000),
            quantum: TimeQuantum::YearMonthDay.code(),
            remote: true,
        };
        assert_eq!(QueryRequest::decode(req.encode_to_vec().as_slice()).unwrap(), req);
    }

    #[test]
    fn test_request_defaults_survive_encoding() {
        let req = QueryRequest {
            index: "i".into(),
            query: "Bitmap(id=1, frame=f)".into(),
            shards: vec![],
            timestamp: None,
            quantum: TimeQuantum::None.code(),
            remote: false,
        };
        let decoded = QueryRequest::decode(req.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.timestamp, None);
        assert!(!decoded.remote);
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_response_decodes_by_call_kind() {
        let (calls, values) = every_kind();
        let resp = QueryResponse {
            err: String::new(),
            results: values.iter().map(QueryResult::from_value).collect::<Result<_>>().unwrap(),
        };
        let decoded = QueryResponse::decode(resp.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, resp);
        assert_eq!(decode_results(&calls, decoded.results).unwrap(), values);
    }

    #[test]
    fn test_result_count_mismatch_is_protocol_error() {
        let (calls, _) = every_kind();
        let err = decode_results(&calls, vec![QueryResult::default()]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_invalid_bitmap_bits_are_protocol_error() {
        let result = QueryResult {
            bitmap: Some(Bitmap { bits: vec![0xff, 0x01], attrs: vec![] }),
            ..Default::default()
        };
        let err = result.into_value(&Call::Bitmap(BitmapCall::bitmap("f", 1))).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_error_response() {
        let resp = QueryResponse::error("index not found");
        let decoded = QueryResponse::decode(resp.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.err, "index not found");
        assert!(decoded.results.is_empty());
    }

    /// A later revision of the request: packed shards plus fields this
    /// build does not know.
    #[derive(Clone, PartialEq, Message)]
    struct NewerRequest {
        #[prost(string, tag = "1")]
        index: String,
        #[prost(uint64, repeated, packed = "true", tag = "3")]
        shards: Vec<u64>,
        #[prost(uint64, tag = "4")]
        retired: u64,
        #[prost(fixed64, tag = "9")]
        extra: u64,
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let newer = NewerRequest { index: "i".into(), shards: vec![1, 2, 150], retired: 1, extra: 42 };
        let req = QueryRequest::decode(newer.encode_to_vec().as_slice()).unwrap();
        assert_eq!(req.index, "i");
        assert_eq!(req.shards, vec![1, 2, 150]);
    }

    #[test]
    fn test_truncated_input_is_protocol_error() {
        let req = QueryRequest { index: "index".into(), ..Default::default() }.encode_to_vec();
        let err: Error = QueryRequest::decode(&req[..3]).unwrap_err().into();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(QueryResponse::decode(&[0x0a_u8, 0xff][..]).is_err());
    }
}
