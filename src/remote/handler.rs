//! Peer side of remote execution: answers `POST /query` and
//! `POST /max-shard` bodies.
//!
//! Status codes follow the request's fate:
//!
//! | Outcome | Status | Body |
//! |---------|--------|------|
//! | unknown path | 404 | plain-text reason |
//! | request not decodable | 400 | plain-text reason |
//! | result not encodable | 500 | plain-text reason |
//! | missing index, parse or execution failure | 200 | response with `err` set |
//! | success | 200 | `QueryResponse { results }` one per call, or `MaxShardResponse` |

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use prost::Message;
use tracing::{debug, warn};

use super::client::{MAX_SHARD_PATH, QUERY_PATH};
use super::wire::{MaxShardRequest, MaxShardResponse, QueryRequest, QueryResponse, QueryResult};
use crate::cancel::CancelToken;
use crate::executor::{ExecOptions, Executor};
use crate::model::{Call, TimeQuantum};
use crate::storage::ShardStorage;
use crate::{Error, Result};

/// Turns query text into calls. The executor never sees text itself.
pub trait QueryParser: Send + Sync + 'static {
    fn parse(&self, text: &str) -> Result<Vec<Call>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HandlerResponse {
    fn plain(status: u16, message: impl std::fmt::Display) -> Self {
        Self { status, body: Bytes::from(format!("{message}\n")) }
    }

    fn query_error(message: impl std::fmt::Display) -> Self {
        Self::encoded(&QueryResponse::error(message.to_string()))
    }

    fn encoded(resp: &impl Message) -> Self {
        Self { status: 200, body: Bytes::from(resp.encode_to_vec()) }
    }
}

/// Anything that can answer an encoded request posted to `path`.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, path: &str, body: Bytes) -> HandlerResponse;
}

/// Runs decoded requests against a node's executor.
pub struct QueryHandler<S: ShardStorage> {
    executor: Arc<Executor<S>>,
    parser: Arc<dyn QueryParser>,
}

impl<S: ShardStorage> QueryHandler<S> {
    pub fn new(executor: Arc<Executor<S>>, parser: Arc<dyn QueryParser>) -> Self {
        Self { executor, parser }
    }

    fn options(req: &QueryRequest) -> Result<ExecOptions> {
        Ok(ExecOptions {
            timestamp: req.timestamp.map(DateTime::from_timestamp_nanos),
            quantum: TimeQuantum::from_code(req.quantum)?,
            remote: req.remote,
            cancel: CancelToken::new(),
        })
    }

    async fn query(&self, body: &[u8]) -> HandlerResponse {
        let req = match QueryRequest::decode(body) {
            Ok(req) => req,
            Err(e) => return HandlerResponse::plain(400, e),
        };
        let opt = match Self::options(&req) {
            Ok(opt) => opt,
            Err(e) => return HandlerResponse::plain(400, e),
        };
        let calls = match self.parser.parse(&req.query) {
            Ok(calls) => calls,
            Err(e) => return HandlerResponse::query_error(e),
        };
        debug!(index = %req.index, shards = req.shards.len(), remote = req.remote, "handling query request");

        let values = match self.executor.execute(&req.index, &calls, &req.shards, &opt).await {
            Ok(values) => values,
            Err(e) => {
                warn!(index = %req.index, error = %e, "query request failed");
                return HandlerResponse::query_error(e);
            }
        };
        match values.iter().map(QueryResult::from_value).collect::<Result<Vec<_>>>() {
            Ok(results) => HandlerResponse::encoded(&QueryResponse { err: String::new(), results }),
            Err(e) => HandlerResponse::plain(500, e),
        }
    }

    async fn max_shard(&self, body: &[u8]) -> HandlerResponse {
        let req = match MaxShardRequest::decode(body) {
            Ok(req) => req,
            Err(e) => return HandlerResponse::plain(400, e),
        };
        let found = if req.index.is_empty() {
            Err(Error::MissingIndex)
        } else {
            self.executor.storage().max_shard(&req.index).await
        };
        let resp = match found {
            Ok(max_shard) => MaxShardResponse { err: String::new(), max_shard },
            Err(e) => MaxShardResponse { err: e.to_string(), max_shard: 0 },
        };
        HandlerResponse::encoded(&resp)
    }
}

#[async_trait]
impl<S: ShardStorage> RequestHandler for QueryHandler<S> {
    async fn handle(&self, path: &str, body: Bytes) -> HandlerResponse {
        match path {
            QUERY_PATH => self.query(&body).await,
            MAX_SHARD_PATH => self.max_shard(&body).await,
            other => HandlerResponse::plain(404, format!("no handler for {other}")),
        }
    }
}
