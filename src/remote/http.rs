//! HTTP transport over reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

use super::client::{Transport, TransportResponse};
use crate::cluster::Node;
use crate::{Error, Result};

/// Posts requests to `http://{host}{path}`.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse a configured client (timeouts, pools, proxies).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn transport_error(node: &Node, e: reqwest::Error) -> Error {
    Error::Remote {
        node: node.to_string(),
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        node: &Node,
        path: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<TransportResponse> {
        let url = format!("http://{}{}", node.host, path);
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error(node, e))?;

        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| transport_error(node, e))?;
        Ok(TransportResponse { status, body })
    }
}
