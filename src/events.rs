//! Typed protocol events
//!
//! Raw [`StreamEvent`] frames are duck-typed JSON; this module models the two
//! protocols the portal streams over the same framing as tagged unions, with
//! an explicit reconciliation step for the backend's two naming conventions
//! (e.g. `issues_found` vs `total_issues` - the more specific field wins).

use crate::sse::StreamEvent;

/// Ties a connection to one wire protocol: how raw frames become typed
/// events, and which events finish the stream.
///
/// The stream connection is generic over this trait so the same lifecycle
/// and reconnection machinery serves both job-progress and chat streams.
pub trait StreamProtocol: Send + Sync + 'static {
    /// The typed event this protocol produces.
    type Event: Clone + std::fmt::Debug + Send + 'static;

    /// Decode one raw frame. Unrecognized names must still decode (to an
    /// `Unknown`-style variant) so receipt order and history are preserved.
    fn decode(raw: &StreamEvent) -> Self::Event;

    /// Whether this event intentionally finishes the stream. A terminal
    /// event closes the connection without any reconnection attempt.
    fn is_terminal(event: &Self::Event) -> bool;
}

/// Final tally carried by a `job_completed` event.
///
/// Every field is optional on the wire; the progress tracker falls back to
/// its locally accumulated counters for anything the producer omits.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompletionPayload {
    pub total_issues: Option<u64>,
    pub crawled_issues: Option<u64>,
    pub related_issues: Option<u64>,
    pub attachments: Option<u64>,
    pub result_ids: Vec<String>,
}

/// Typed events of the crawl-job progress protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    JobStarted,
    Authenticating,
    Authenticated,
    Searching,
    SearchCompleted {
        total_issues: u64,
    },
    CrawlingIssue {
        issue_number: u64,
        total_issues: Option<u64>,
    },
    RelatedIssuesFound {
        related_count: u64,
    },
    ProcessingAttachments {
        count: Option<u64>,
    },
    Embedding,
    /// Terminal success, with the producer's final tally.
    JobCompleted(CompletionPayload),
    /// Terminal failure reported by the job itself.
    JobFailed {
        message: String,
    },
    /// Terminal cancellation.
    Cancelled {
        reason: Option<String>,
    },
    /// Stream-level error event. Not terminal for a job: a hiccup the
    /// producer reports in-band must not fail the whole job.
    StreamError {
        message: String,
    },
    /// Unrecognized event name, kept for forward compatibility.
    Unknown {
        name: String,
    },
}

impl JobEvent {
    /// Decode a raw frame into a typed job event.
    pub fn from_raw(raw: &StreamEvent) -> Self {
        match raw.name.as_str() {
            "job_started" => JobEvent::JobStarted,
            "authenticating" => JobEvent::Authenticating,
            "authenticated" => JobEvent::Authenticated,
            "searching" => JobEvent::Searching,
            "search_completed" => JobEvent::SearchCompleted {
                // Both backend conventions appear in the wild; prefer the
                // more specific total_issues when both are present.
                total_issues: raw
                    .u64_field("total_issues")
                    .or_else(|| raw.u64_field("issues_found"))
                    .unwrap_or(0),
            },
            "crawling_issue" => JobEvent::CrawlingIssue {
                issue_number: raw.u64_field("issue_number").unwrap_or(0),
                total_issues: raw
                    .u64_field("total_issues")
                    .or_else(|| raw.u64_field("issues_found")),
            },
            "related_issues_found" => JobEvent::RelatedIssuesFound {
                related_count: raw
                    .u64_field("related_count")
                    .or_else(|| raw.u64_field("count"))
                    .unwrap_or(0),
            },
            "processing_attachments" => JobEvent::ProcessingAttachments {
                count: raw
                    .u64_field("attachments_processed")
                    .or_else(|| raw.u64_field("count")),
            },
            "embedding" => JobEvent::Embedding,
            "job_completed" => JobEvent::JobCompleted(CompletionPayload {
                total_issues: raw
                    .u64_field("total_issues")
                    .or_else(|| raw.u64_field("issues_found")),
                crawled_issues: raw.u64_field("crawled_issues"),
                related_issues: raw.u64_field("related_issues"),
                attachments: raw.u64_field("attachments"),
                result_ids: raw.str_list_field("result_ids"),
            }),
            "job_failed" => JobEvent::JobFailed {
                message: error_message(raw),
            },
            "cancelled" => JobEvent::Cancelled {
                reason: raw.str_field("reason").map(str::to_string),
            },
            "error" => JobEvent::StreamError {
                message: error_message(raw),
            },
            other => JobEvent::Unknown {
                name: other.to_string(),
            },
        }
    }
}

/// Job-progress protocol marker.
pub struct JobProtocol;

impl StreamProtocol for JobProtocol {
    type Event = JobEvent;

    fn decode(raw: &StreamEvent) -> JobEvent {
        JobEvent::from_raw(raw)
    }

    fn is_terminal(event: &JobEvent) -> bool {
        matches!(
            event,
            JobEvent::JobCompleted(_) | JobEvent::JobFailed { .. } | JobEvent::Cancelled { .. }
        )
    }
}

/// Typed events of the token-by-token chat protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// One streamed content token.
    Token { text: String },
    /// Terminal success.
    Done { message_id: Option<String> },
    /// Terminal error. Unlike the job protocol, a chat stream has no
    /// recoverable in-band error: any `error` event ends it.
    ChatError { message: String },
    /// Unrecognized event name, kept for forward compatibility.
    Unknown { name: String },
}

impl ChatEvent {
    /// Decode a raw frame into a typed chat event.
    pub fn from_raw(raw: &StreamEvent) -> Self {
        match raw.name.as_str() {
            "token" | "content" | "delta" | "message" => ChatEvent::Token {
                text: raw
                    .str_field("text")
                    .or_else(|| raw.str_field("content"))
                    .or_else(|| raw.str_field("data"))
                    .unwrap_or_default()
                    .to_string(),
            },
            "done" => ChatEvent::Done {
                message_id: raw.str_field("message_id").map(str::to_string),
            },
            "error" => ChatEvent::ChatError {
                message: error_message(raw),
            },
            other => ChatEvent::Unknown {
                name: other.to_string(),
            },
        }
    }
}

/// Chat protocol marker.
pub struct ChatProtocol;

impl StreamProtocol for ChatProtocol {
    type Event = ChatEvent;

    fn decode(raw: &StreamEvent) -> ChatEvent {
        ChatEvent::from_raw(raw)
    }

    fn is_terminal(event: &ChatEvent) -> bool {
        matches!(event, ChatEvent::Done { .. } | ChatEvent::ChatError { .. })
    }
}

fn error_message(raw: &StreamEvent) -> String {
    raw.str_field("message")
        .or_else(|| raw.str_field("error"))
        .unwrap_or("unknown error")
        .to_string()
}
