//! Stream transport trait abstraction.
//!
//! Abstracts how the long-lived event channel is acquired, enabling
//! dependency injection and mocking in tests: the connection state machine
//! is exercised against a scripted transport without a real network.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// A live byte stream from one opened transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Transport-level errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The transport could not be opened at all.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The server refused the stream with an HTTP status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    /// The stream broke mid-flight.
    #[error("stream read failed: {0}")]
    Read(String),
}

/// Where a stream connection points: endpoint URL plus an opaque credential.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTarget {
    /// Full URL of the streaming endpoint.
    pub url: String,
    /// Bearer credential sent with the request, if any.
    pub bearer_token: Option<String>,
}

impl StreamTarget {
    /// Create a target for the given endpoint URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
        }
    }

    /// Attach a bearer credential.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Trait for acquiring a long-lived event byte stream.
///
/// One call to [`open`](StreamTransport::open) corresponds to one underlying
/// transport instance; the connection driver is the sole owner of the
/// returned handle and reopens on reconnection.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open the stream, yielding transport chunks as they arrive.
    async fn open(&self, target: &StreamTarget) -> Result<ByteStream, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        assert_eq!(
            TransportError::Connect("refused".to_string()).to_string(),
            "connection failed: refused"
        );
        assert_eq!(
            TransportError::Status {
                status: 404,
                message: "job not found".to_string()
            }
            .to_string(),
            "server returned 404: job not found"
        );
        assert_eq!(
            TransportError::Read("reset by peer".to_string()).to_string(),
            "stream read failed: reset by peer"
        );
    }

    #[test]
    fn test_stream_target_builder() {
        let target = StreamTarget::new("http://portal/api/v1/crawl-jobs/j1/stream")
            .with_bearer_token("tok");
        assert_eq!(target.url, "http://portal/api/v1/crawl-jobs/j1/stream");
        assert_eq!(target.bearer_token.as_deref(), Some("tok"));
    }
}
