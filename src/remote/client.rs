//! Delegation of shard groups to peer nodes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use tracing::debug;

use super::wire::{decode_results, MaxShardRequest, MaxShardResponse, QueryRequest, QueryResponse};
use crate::cluster::Node;
use crate::executor::ExecOptions;
use crate::model::{Call, QueryValue};
use crate::{Error, Result};

/// Path peers serve query requests on.
pub const QUERY_PATH: &str = "/query";

/// Path peers report their highest shard on.
pub const MAX_SHARD_PATH: &str = "/max-shard";

/// Content type of encoded requests and responses.
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Raw reply from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Moves an encoded request to a peer and brings back its reply.
///
/// An `Err` means the exchange itself failed (unreachable peer, broken
/// connection). Non-2xx statuses are returned as ordinary responses.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn post(
        &self,
        node: &Node,
        path: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<TransportResponse>;
}

/// Sends sub-queries to peers and decodes their typed results.
#[derive(Clone)]
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
}

impl RemoteClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport, timeout: None }
    }

    /// Bound every remote call by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute `calls` over `shards` on `node`, returning one value per call.
    pub async fn delegate(
        &self,
        node: &Node,
        index: &str,
        calls: &[Call],
        shards: &[u64],
        opt: &ExecOptions,
    ) -> Result<Vec<QueryValue>> {
        opt.cancel.check()?;

        let query = calls.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n");
        let req = QueryRequest {
            index: index.to_string(),
            query,
            shards: shards.to_vec(),
            timestamp: opt.timestamp.and_then(|t| t.timestamp_nanos_opt()),
            quantum: opt.quantum.code(),
            remote: true,
        };
        debug!(node = %node, index, shards = shards.len(), calls = calls.len(), "delegating shard group");

        let (status, body) = self.exchange(node, QUERY_PATH, req.encode_to_vec()).await?;
        let decoded = QueryResponse::decode(&body[..])?;
        if !decoded.err.is_empty() {
            return Err(Error::Remote { node: node.to_string(), status: Some(status), message: decoded.err });
        }
        decode_results(calls, decoded.results)
    }

    /// Highest shard `node` holds for `index`.
    pub async fn max_shard(&self, node: &Node, index: &str, opt: &ExecOptions) -> Result<u64> {
        opt.cancel.check()?;

        let req = MaxShardRequest { index: index.to_string() };
        let (status, body) = self.exchange(node, MAX_SHARD_PATH, req.encode_to_vec()).await?;
        let decoded = MaxShardResponse::decode(&body[..])?;
        if !decoded.err.is_empty() {
            return Err(Error::Remote { node: node.to_string(), status: Some(status), message: decoded.err });
        }
        Ok(decoded.max_shard)
    }

    /// Post `body` to `path` on `node`, returning a 2xx reply's status and body.
    async fn exchange(&self, node: &Node, path: &str, body: Vec<u8>) -> Result<(u16, Bytes)> {
        let send = self.transport.post(node, path, PROTOBUF_CONTENT_TYPE, Bytes::from(body));
        let sent = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, send).await.map_err(|_| Error::Remote {
                node: node.to_string(),
                status: None,
                message: format!("timed out after {}ms", limit.as_millis()),
            })?,
            None => send.await,
        };
        let resp = sent.map_err(|e| match e {
            Error::Remote { .. } => e,
            other => Error::Remote {
                node: node.to_string(),
                status: None,
                message: other.to_string(),
            },
        })?;

        if !(200..300).contains(&resp.status) {
            return Err(Error::Remote {
                node: node.to_string(),
                status: Some(resp.status),
                message: String::from_utf8_lossy(&resp.body).trim().to_string(),
            });
        }
        Ok((resp.status, resp.body))
    }
}
