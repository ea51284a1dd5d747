//! Mock transport for tests.
//!
//! Plays back a script of connection outcomes so connection lifecycle,
//! reconnection, and teardown can be tested without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;

use crate::traits::{ByteStream, StreamTarget, StreamTransport, TransportError};

/// One scripted result of a transport `open()` call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// The open itself fails.
    Refused(String),
    /// The open succeeds and delivers these chunks in order. An `Err` chunk
    /// breaks the stream mid-flight; after the last chunk the stream ends.
    Stream(Vec<Result<String, String>>),
}

impl MockOutcome {
    /// Convenience: a stream delivering the given text chunks, then EOF.
    pub fn chunks(chunks: &[&str]) -> Self {
        MockOutcome::Stream(chunks.iter().map(|c| Ok(c.to_string())).collect())
    }

    /// Convenience: a stream delivering one text chunk then a read error.
    pub fn chunk_then_error(chunk: &str, error: &str) -> Self {
        MockOutcome::Stream(vec![Ok(chunk.to_string()), Err(error.to_string())])
    }
}

/// Scripted [`StreamTransport`] that records every open call.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockOutcome>>,
    opens: Mutex<Vec<tokio::time::Instant>>,
}

impl MockTransport {
    /// Create a transport that plays back `script` in order. Once the script
    /// is exhausted, further opens are refused.
    pub fn new(script: Vec<MockOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            opens: Mutex::new(Vec::new()),
        }
    }

    /// How many times `open()` has been called.
    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// Instants at which `open()` was called, in order.
    pub fn open_times(&self) -> Vec<tokio::time::Instant> {
        self.opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn open(&self, _target: &StreamTarget) -> Result<ByteStream, TransportError> {
        self.opens.lock().unwrap().push(tokio::time::Instant::now());

        let outcome = self.script.lock().unwrap().pop_front();
        match outcome {
            Some(MockOutcome::Refused(message)) => Err(TransportError::Connect(message)),
            Some(MockOutcome::Stream(items)) => {
                let chunks = items.into_iter().map(|item| {
                    item.map(Bytes::from).map_err(TransportError::Read)
                });
                Ok(Box::pin(stream::iter(chunks)) as ByteStream)
            }
            None => Err(TransportError::Connect("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn target() -> StreamTarget {
        StreamTarget::new("mock://job/stream")
    }

    #[tokio::test]
    async fn test_refused_outcome() {
        let transport = MockTransport::new(vec![MockOutcome::Refused("nope".to_string())]);
        match transport.open(&target()).await {
            Err(e) => assert_eq!(e, TransportError::Connect("nope".to_string())),
            Ok(_) => panic!("expected refused open"),
        }
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_outcome_delivers_chunks_then_ends() {
        let transport = MockTransport::new(vec![MockOutcome::chunks(&["a", "b"])]);
        let mut stream = transport.open(&target()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("a"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("b"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_mid_stream_error() {
        let transport =
            MockTransport::new(vec![MockOutcome::chunk_then_error("a", "reset")]);
        let mut stream = transport.open(&target()).await.unwrap();

        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(
            stream.next().await.unwrap().unwrap_err(),
            TransportError::Read("reset".to_string())
        );
    }

    #[tokio::test]
    async fn test_exhausted_script_refuses() {
        let transport = MockTransport::new(vec![]);
        let result = transport.open(&target()).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
