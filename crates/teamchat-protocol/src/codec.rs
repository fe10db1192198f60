//! JSON text codec for relay frames.
//!
//! Inbound text is decoded into a [`Payload`] (a JSON object). Outbound values
//! are encoded once into an [`EncodedFrame`], a shared text buffer that can be
//! handed to any number of recipients without re-serializing.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A decoded client message: a JSON object relayed without interpretation.
pub type Payload = serde_json::Map<String, Value>;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound text is not valid JSON.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Inbound text is valid JSON but not an object.
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Outbound value could not be serialized.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A serialized text frame, cheap to clone.
///
/// All recipients of one broadcast share the same buffer, so they receive
/// byte-identical output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedFrame(Arc<str>);

impl EncodedFrame {
    /// Get the frame text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the frame size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether two frames share the same underlying buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &EncodedFrame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for EncodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EncodedFrame {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for EncodedFrame {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

/// Encode a value to a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<EncodedFrame, ProtocolError> {
    let text = serde_json::to_string(value).map_err(ProtocolError::Encode)?;
    Ok(EncodedFrame::from(text))
}

/// Decode a text frame into a payload.
///
/// # Errors
///
/// Returns an error if the text is not valid JSON or is not a JSON object.
pub fn decode(text: &str) -> Result<Payload, ProtocolError> {
    match serde_json::from_str::<Value>(text).map_err(ProtocolError::Decode)? {
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::NotAnObject(json_kind(&other))),
    }
}

/// Get the `type` discriminator of a payload, if it carries one.
#[must_use]
pub fn message_type(payload: &Payload) -> Option<&str> {
    payload.get("type").and_then(Value::as_str)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_object() {
        let payload = decode(r#"{"type":"text","content":"hi"}"#).unwrap();
        assert_eq!(message_type(&payload), Some("text"));
        assert_eq!(payload.get("content"), Some(&json!("hi")));
    }

    #[test]
    fn test_decode_invalid_json() {
        match decode("not-json") {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_non_object() {
        match decode("[1, 2, 3]") {
            Err(ProtocolError::NotAnObject("array")) => {}
            other => panic!("Expected NotAnObject error, got {:?}", other),
        }
        assert!(decode("42").is_err());
        assert!(decode("\"text\"").is_err());
    }

    #[test]
    fn test_relay_preserves_key_order() {
        let raw = r#"{"type":"text","content":"hi","author":"ana","ts":3}"#;
        let payload = decode(raw).unwrap();
        let frame = encode(&payload).unwrap();
        assert_eq!(frame.as_str(), raw);
    }

    #[test]
    fn test_relay_keeps_numbers_exact() {
        let raw = r#"{"id":123456789012345678901234567890,"neg":-98765432109876543210,"ratio":0.1}"#;
        let payload = decode(raw).unwrap();
        assert_eq!(encode(&payload).unwrap().as_str(), raw);
    }

    #[test]
    fn test_encoded_frame_clones_share_buffer() {
        let frame = encode(&json!({"type": "text"})).unwrap();
        let copy = frame.clone();
        assert!(frame.ptr_eq(&copy));
        assert_eq!(frame.len(), copy.len());
        assert!(!frame.is_empty());
    }

    #[test]
    fn test_message_type_missing() {
        let payload = decode(r#"{"content":"hi"}"#).unwrap();
        assert_eq!(message_type(&payload), None);
    }
}
