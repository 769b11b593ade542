//! # Stream Events and Line Decoding
//!
//! The filtered stream delivers one JSON object per line. Between events the server
//! sends bare newlines to keep the connection open. The decoder below classifies a
//! raw line without ever returning an error: protocol noise is absorbed here so the
//! dispatch pipeline only ever sees well-formed objects.

use serde_json::{Map, Value};

/// Key holding the list of rules an event matched.
pub const MATCHING_RULES_KEY: &str = "matching_rules";

/// # Stream Event
///
/// One decoded line of the stream body. The payload is always a non-empty JSON
/// object; it is shared by reference with every subscriber during dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    payload: Map<String, Value>,
}

impl StreamEvent {
    /// Wraps an already-parsed object.
    pub fn new(payload: Map<String, Value>) -> Self {
        Self { payload }
    }

    /// The decoded JSON object.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Tag of the first matching rule, when the event carries
    /// `matching_rules: [{ "tag": "..." }, ...]`.
    pub fn tag(&self) -> Option<&str> {
        self.payload
            .get(MATCHING_RULES_KEY)?
            .as_array()?
            .first()?
            .get("tag")?
            .as_str()
    }

    /// Serializes the payload as a single line of JSON, without the trailing newline.
    pub fn to_json_line(&self) -> String {
        // A `Map<String, Value>` always serializes.
        Value::Object(self.payload.clone()).to_string()
    }

    /// Consumes the event and returns the payload as a `Value`.
    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }
}

/// Classification of one raw line.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    /// A JSON object carrying data.
    Event(StreamEvent),
    /// Keep-alive: an empty line, or an empty object.
    Heartbeat,
    /// Anything else: invalid UTF-8, invalid JSON, or JSON that is not an object.
    Malformed,
}

impl DecodedLine {
    /// Drops the heartbeat/malformed distinction.
    pub fn into_event(self) -> Option<StreamEvent> {
        match self {
            DecodedLine::Event(event) => Some(event),
            DecodedLine::Heartbeat | DecodedLine::Malformed => None,
        }
    }
}

/// Classifies one line of the stream body. Trailing `\r` and surrounding
/// whitespace are ignored.
pub fn decode(line: &[u8]) -> DecodedLine {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(_) => return DecodedLine::Malformed,
    };
    if text.is_empty() {
        return DecodedLine::Heartbeat;
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) if map.is_empty() => DecodedLine::Heartbeat,
        Ok(Value::Object(map)) => DecodedLine::Event(StreamEvent::new(map)),
        Ok(_) | Err(_) => DecodedLine::Malformed,
    }
}

/// Decodes one line into an event, or `None` for heartbeats and malformed input.
pub fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    decode(line).into_event()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_from(value: Value) -> StreamEvent {
        match value {
            Value::Object(map) => StreamEvent::new(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn empty_and_blank_lines_are_heartbeats() {
        assert_eq!(decode(b""), DecodedLine::Heartbeat);
        assert_eq!(decode(b"\r"), DecodedLine::Heartbeat);
        assert_eq!(decode(b"   \r"), DecodedLine::Heartbeat);
        assert!(decode_line(b"").is_none());
    }

    #[test]
    fn broken_json_is_malformed_not_an_error() {
        assert_eq!(decode(b"{not json"), DecodedLine::Malformed);
        assert_eq!(decode(&[0xff, 0xfe, b'{']), DecodedLine::Malformed);
        assert!(decode_line(b"{not json").is_none());
    }

    #[test]
    fn non_object_json_is_malformed() {
        assert_eq!(decode(b"42"), DecodedLine::Malformed);
        assert_eq!(decode(b"[1,2]"), DecodedLine::Malformed);
        assert_eq!(decode(b"\"text\""), DecodedLine::Malformed);
    }

    #[test]
    fn empty_object_carries_no_event() {
        assert_eq!(decode(b"{}"), DecodedLine::Heartbeat);
    }

    #[test]
    fn object_line_decodes_with_crlf() {
        let event = decode_line(b"{\"data\":{\"id\":\"1\"}}\r").expect("event");
        assert_eq!(event.payload()["data"]["id"], "1");
    }

    #[test]
    fn tag_comes_from_first_matching_rule() {
        let event = event_from(json!({
            "data": {"id": "7"},
            "matching_rules": [{"id": "a", "tag": "first"}, {"id": "b", "tag": "second"}]
        }));
        assert_eq!(event.tag(), Some("first"));
    }

    #[test]
    fn tag_missing_when_shape_is_wrong() {
        assert_eq!(event_from(json!({"data": 1})).tag(), None);
        assert_eq!(event_from(json!({"matching_rules": []})).tag(), None);
        assert_eq!(event_from(json!({"matching_rules": [{"id": "a"}]})).tag(), None);
        assert_eq!(event_from(json!({"matching_rules": [{"tag": 5}]})).tag(), None);
        assert_eq!(event_from(json!({"matching_rules": "t"})).tag(), None);
    }

    #[test]
    fn json_line_is_single_line() {
        let event = event_from(json!({"text": "a\nb", "n": 1}));
        let line = event.to_json_line();
        assert!(!line.contains('\n'));
        let back: Value = serde_json::from_str(&line).expect("valid json");
        assert_eq!(back, event.into_value());
    }
}
