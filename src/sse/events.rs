//! SSE frame types
//!
//! Contains the raw [`StreamEvent`] record produced by the frame decoder and
//! the [`SseLine`] classification used while scanning the wire format.

use serde_json::{Map, Value};

/// One decoded protocol frame: an event name plus its free-form JSON payload.
///
/// Payload fields are defined per event name; there is no fixed schema across
/// names. Receipt order is preserved by the decoder and never reordered.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Event name, from the `event:` line or the payload's `event` field.
    pub name: String,
    /// Free-form payload fields from the `data:` line.
    pub payload: Map<String, Value>,
}

impl StreamEvent {
    /// Create a new event record.
    pub fn new(name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Read a payload field as an unsigned integer.
    ///
    /// Producers are inconsistent about numeric encoding, so JSON strings
    /// holding digits are accepted too.
    pub fn u64_field(&self, key: &str) -> Option<u64> {
        match self.payload.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Read a payload field as a string slice.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Read a payload field as a list of strings, skipping non-string items.
    pub fn str_list_field(&self, key: &str) -> Vec<String> {
        self.payload
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Represents a single classified line of the wire format.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// Event name declaration (e.g., "event: job_started")
    Event(String),
    /// Data payload (e.g., "data: {\"total_issues\": 10}")
    Data(String),
    /// Empty line - frame separator
    Empty,
    /// Comment line (starts with ':'), used as keep-alive
    Comment(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_u64_field_from_number() {
        let event = StreamEvent::new("search_completed", payload(json!({"total_issues": 10})));
        assert_eq!(event.u64_field("total_issues"), Some(10));
    }

    #[test]
    fn test_u64_field_from_numeric_string() {
        let event = StreamEvent::new("crawling_issue", payload(json!({"issue_number": "7"})));
        assert_eq!(event.u64_field("issue_number"), Some(7));
    }

    #[test]
    fn test_u64_field_missing_or_wrong_type() {
        let event = StreamEvent::new("job_started", payload(json!({"flag": true})));
        assert_eq!(event.u64_field("flag"), None);
        assert_eq!(event.u64_field("absent"), None);
    }

    #[test]
    fn test_str_field() {
        let event = StreamEvent::new("job_failed", payload(json!({"message": "boom"})));
        assert_eq!(event.str_field("message"), Some("boom"));
        assert_eq!(event.str_field("absent"), None);
    }

    #[test]
    fn test_str_list_field() {
        let event = StreamEvent::new(
            "job_completed",
            payload(json!({"result_ids": ["a", "b", 3]})),
        );
        assert_eq!(event.str_list_field("result_ids"), vec!["a", "b"]);
        assert!(event.str_list_field("absent").is_empty());
    }
}
