//! Knowledge-portal API client.
//!
//! [`PortalClient`] is the HTTP entry point: it builds stream targets for
//! crawl-job progress endpoints and streams chat responses as decoded
//! [`ChatEvent`]s over Server-Sent Events.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::connection::StreamConfig;
use crate::events::ChatEvent;
use crate::sse::FrameDecoder;
use crate::traits::StreamTarget;

/// Error type for portal client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

/// Body for the chat streaming endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            thread_id: None,
        }
    }

    /// Continue an existing conversation thread.
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }
}

/// Client for the knowledge-portal backend API.
pub struct PortalClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            client: Client::new(),
        }
    }

    /// Attach a bearer token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stream target for one crawl job's progress endpoint.
    pub fn job_stream_target(&self, job_id: &str) -> StreamTarget {
        let url = format!(
            "{}/api/v1/crawl-jobs/{}/stream",
            self.base_url,
            urlencoding::encode(job_id)
        );
        match &self.token {
            Some(token) => StreamTarget::new(url).with_bearer_token(token.clone()),
            None => StreamTarget::new(url),
        }
    }

    /// Ready-to-use connection config for one crawl job.
    pub fn job_stream_config(&self, job_id: &str) -> StreamConfig {
        StreamConfig::for_target(self.job_stream_target(job_id))
    }

    /// Stream a chat response token by token.
    ///
    /// Sends a POST to `/v1/chat/stream` and decodes the SSE response into
    /// [`ChatEvent`]s. The stream ends when the server closes the response;
    /// a well-behaved server sends `done` or `error` first.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<ChatEvent, ClientError>> + Send>>, ClientError>
    {
        let url = format!("{}/v1/chat/stream", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ClientError::Server { status, message });
        }

        let bytes_stream = response.bytes_stream();

        // Decode chunk by chunk, queueing events so one chunk that completes
        // several frames still yields them one at a time.
        let event_stream = stream::unfold(
            (bytes_stream, FrameDecoder::new(), VecDeque::new(), false),
            |(mut bytes_stream, mut decoder, mut pending, mut done)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (bytes_stream, decoder, pending, done)));
                    }
                    if done {
                        return None;
                    }

                    match bytes_stream.next().await {
                        Some(Ok(chunk)) => {
                            for raw in decoder.feed(&chunk) {
                                pending.push_back(ChatEvent::from_raw(&raw));
                            }
                        }
                        Some(Err(e)) => {
                            done = true;
                            return Some((
                                Err(ClientError::Http(e)),
                                (bytes_stream, decoder, pending, done),
                            ));
                        }
                        None => {
                            debug!("chat stream ended");
                            done = true;
                            if let Some(raw) = decoder.finish() {
                                pending.push_back(ChatEvent::from_raw(&raw));
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }

    /// `true` if the portal's health endpoint answers 200.
    pub async fn health_check(&self) -> Result<bool, ClientError> {
        let url = format!("{}/v1/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_stream_target_encodes_id() {
        let client = PortalClient::new("http://portal:8000");
        let target = client.job_stream_target("job/42 a");
        assert_eq!(
            target.url,
            "http://portal:8000/api/v1/crawl-jobs/job%2F42%20a/stream"
        );
        assert!(target.bearer_token.is_none());
    }

    #[test]
    fn test_job_stream_target_carries_token() {
        let client = PortalClient::new("http://portal:8000").with_token("secret");
        let target = client.job_stream_target("j1");
        assert_eq!(target.bearer_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest::new("hello");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"prompt": "hello"}));

        let request = ChatRequest::new("hello").with_thread("t-1");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["thread_id"], "t-1");
    }

    #[tokio::test]
    async fn test_chat_stream_unreachable_server() {
        let client = PortalClient::new("http://127.0.0.1:1");
        let result = client.chat_stream(&ChatRequest::new("hi")).await;
        assert!(matches!(result, Err(ClientError::Http(_))));
    }

    #[tokio::test]
    async fn test_health_check_unreachable_server() {
        let client = PortalClient::new("http://127.0.0.1:1");
        assert!(client.health_check().await.is_err());
    }
}
