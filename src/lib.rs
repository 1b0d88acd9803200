//! # bitshard: Distributed Bitmap Query Execution
//!
//! Evaluates typed bitmap queries across a sharded cluster: each shard is
//! evaluated where it lives, per-shard answers are merged with the laws of
//! their call kind, and a maximal-biclique engine mines co-occurring rows.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `ShardStorage` is the contract between executor and storage
//! 2. **Closed call tree**: `Call` / `BitmapCall` are matched exhaustively
//! 3. **Parser owns nothing**: the executor consumes calls, never query text
//! 4. **Transport-agnostic delegation**: remote shards go through a `Transport`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bitshard::{BitmapCall, Call, ExecOptions, Executor, MemoryStorage};
//!
//! # async fn example() -> bitshard::Result<()> {
//! let executor = Executor::local(Arc::new(MemoryStorage::new()));
//!
//! let results = executor.execute(
//!     "events",
//!     &[Call::Count(BitmapCall::bitmap("general", 10))],
//!     &[],
//!     &ExecOptions::default(),
//! ).await?;
//!
//! println!("{}", results[0].clone().into_count()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! | Transport | Feature | Description |
//! |-----------|---------|-------------|
//! | Loopback | (default) | In-process registry of peer handlers |
//! | HTTP | `http` | `POST /query` via reqwest |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod cancel;
pub mod cluster;
pub mod config;
pub mod storage;
pub mod biclique;
pub mod executor;
pub mod remote;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    AttrMap, AttrValue, Biclique, Bitmap, BitmapCall, BitmapPair, Call, Pair, QueryValue, TimeQuantum,
};

// ============================================================================
// Re-exports: Storage, cluster, execution
// ============================================================================

pub use cancel::CancelToken;
pub use cluster::{ClusterTopology, Node, StaticCluster};
pub use config::{ClusterConfig, Config, ExecutorConfig};
pub use executor::{CallEvent, ExecOptions, Executor, PartialBicliques, ResultStream, ShardFailure};
pub use remote::{QueryHandler, QueryParser, RemoteClient, Transport};
pub use storage::{MemoryStorage, ShardStorage};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Index name is required")]
    MissingIndex,

    #[error("Remote error from {node} (status {status:?}): {message}")]
    Remote {
        node: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Query cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
