//! Incremental frame decoding
//!
//! Contains the line classifier and the chunk-level [`FrameDecoder`] that
//! turns an unbounded byte stream into complete [`StreamEvent`] records
//! without buffering the whole stream.

use tracing::debug;

use crate::sse::events::{SseLine, StreamEvent};

/// Classify a single line of the wire format.
pub fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }

    if let Some(stripped) = line.strip_prefix(':') {
        return SseLine::Comment(stripped.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.trim().to_string());
    }

    // Unknown line format - treat as comment
    SseLine::Comment(line.to_string())
}

/// Stateful decoder that accepts transport chunks split at arbitrary byte
/// boundaries and yields complete events as soon as they are available.
///
/// Each `data:` line carries one complete JSON object and emits one event
/// immediately; a blank frame separator is tolerated but not required, so
/// producers that send consecutive `data:` lines decode identically. The
/// event name comes from a preceding `event:` line when present, otherwise
/// from the payload's `event` field.
///
/// Malformed JSON on a `data:` line is logged and dropped; the stream is
/// never aborted for a single bad frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Carry-over bytes of the last incomplete line across chunk boundaries
    carry: Vec<u8>,
    /// Event name announced by an `event:` line, consumed by the next `data:`
    pending_event: Option<String>,
}

impl FrameDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of transport bytes, returning every event completed by it.
    ///
    /// Chunks may split a frame anywhere, including mid-line or mid-field;
    /// the final incomplete fragment is re-buffered for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.carry.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let rest = self.carry.split_off(pos + 1);
            let raw_line = std::mem::replace(&mut self.carry, rest);
            let line = String::from_utf8_lossy(&raw_line[..pos]);
            let line = line.trim_end_matches('\r');

            if let Some(event) = self.feed_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was never newline-terminated.
    ///
    /// Call once when the transport reports end of input.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.carry.is_empty() {
            return None;
        }
        let raw_line = std::mem::take(&mut self.carry);
        let line = String::from_utf8_lossy(&raw_line);
        self.feed_line(line.trim_end_matches('\r'))
    }

    /// Reset all accumulated state, e.g. when a connection is reopened.
    pub fn reset(&mut self) {
        self.carry.clear();
        self.pending_event = None;
    }

    fn feed_line(&mut self, line: &str) -> Option<StreamEvent> {
        match parse_sse_line(line) {
            SseLine::Event(name) => {
                self.pending_event = Some(name);
                None
            }
            SseLine::Data(data) => self.emit(&data),
            SseLine::Empty => {
                // Frame separator. An `event:` line that never got its data
                // line is stale at this point.
                if let Some(name) = self.pending_event.take() {
                    debug!(event = %name, "dropping event line without data");
                }
                None
            }
            SseLine::Comment(_) => None,
        }
    }

    fn emit(&mut self, data: &str) -> Option<StreamEvent> {
        let pending = self.pending_event.take();

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "dropping frame with malformed JSON payload");
                return None;
            }
        };

        let payload = match value {
            serde_json::Value::Object(map) => map,
            other => {
                debug!(payload = %other, "dropping frame with non-object payload");
                return None;
            }
        };

        let name = pending
            .or_else(|| {
                payload
                    .get("event")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "message".to_string());

        Some(StreamEvent::new(name, payload))
    }
}
