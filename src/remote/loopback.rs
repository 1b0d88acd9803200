//! In-process transport: peers are handlers registered by host.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::RwLock;

use super::client::{Transport, TransportResponse};
use super::handler::RequestHandler;
use crate::cluster::Node;
use crate::{Error, Result};

/// Routes requests to handlers living in the same process.
#[derive(Default)]
pub struct LoopbackTransport {
    peers: RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handler` reachable at `host`, replacing any previous one.
    pub fn register(&self, host: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.peers.write().insert(host.into(), handler);
    }

    /// Make `host` unreachable.
    pub fn unregister(&self, host: &str) {
        self.peers.write().remove(host);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn post(
        &self,
        node: &Node,
        path: &str,
        _content_type: &str,
        body: Bytes,
    ) -> Result<TransportResponse> {
        // Clone out of the lock: the handler may post back through us.
        let handler = self.peers.read().get(&node.host).cloned();
        let handler = handler.ok_or_else(|| Error::Remote {
            node: node.to_string(),
            status: None,
            message: "connection refused".into(),
        })?;

        let resp = handler.handle(path, body).await;
        Ok(TransportResponse { status: resp.status, body: resp.body })
    }
}
