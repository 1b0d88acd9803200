//! # Remote Execution
//!
//! Shard groups owned by other nodes are encoded as a `QueryRequest`, posted
//! to the peer's `/query` endpoint through a `Transport`, and answered by the
//! peer's `QueryHandler`. Before expanding an empty shard list, the
//! coordinator asks every peer for its highest shard at `/max-shard`.
//!
//! ## Transports
//!
//! | Transport | Module | Description |
//! |-----------|--------|-------------|
//! | `LoopbackTransport` | `loopback` | In-process peers, for embedding and tests |
//! | `HttpTransport` | `http` | reqwest client (feature `http`) |

pub mod client;
pub mod handler;
pub mod loopback;
pub mod wire;

#[cfg(feature = "http")]
pub mod http;

pub use client::{
    RemoteClient, Transport, TransportResponse, MAX_SHARD_PATH, PROTOBUF_CONTENT_TYPE, QUERY_PATH,
};
pub use handler::{HandlerResponse, QueryHandler, QueryParser, RequestHandler};
pub use loopback::LoopbackTransport;
pub use wire::{
    decode_results, MaxShardRequest, MaxShardResponse, QueryRequest, QueryResponse, QueryResult,
};

#[cfg(feature = "http")]
pub use http::HttpTransport;
