//! Default HTTP transport adapter.
//!
//! Opens the credentialed GET event stream with `reqwest` and exposes the
//! response body as an incremental byte stream.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::traits::{ByteStream, StreamTarget, StreamTransport, TransportError};

/// Real transport backed by a reusable [`reqwest::Client`].
#[derive(Debug, Default, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a fresh HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport reusing an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for ReqwestTransport {
    async fn open(&self, target: &StreamTarget) -> Result<ByteStream, TransportError> {
        debug!(url = %target.url, "opening event stream");

        let mut request = self
            .client
            .get(&target.url)
            .header("Accept", "text/event-stream");
        if let Some(token) = &target.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TransportError::Status { status, message });
        }

        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(|e| TransportError::Read(e.to_string())));

        Ok(Box::pin(stream))
    }
}
