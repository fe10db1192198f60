//! Frame types for the TeamChat relay protocol.
//!
//! The server only originates two kinds of frames: the acknowledgement sent
//! once when a connection joins a channel, and the error frame echoed back to
//! a sender whose input could not be decoded. Everything else on the wire is
//! a client payload relayed verbatim.

use serde::{Deserialize, Serialize};

/// Status text carried by the acknowledgement frame.
pub const CONNECTED_MESSAGE: &str = "WebSocket connected successfully";

/// Error discriminator carried by the decode-error frame.
pub const INVALID_JSON: &str = "Invalid JSON";

/// WebSocket close codes used by the relay.
pub mod close_code {
    /// Policy violation, sent when the channel key in the connect path is invalid.
    pub const POLICY_VIOLATION: u16 = 1008;

    /// Close reason paired with [`POLICY_VIOLATION`].
    pub const INVALID_CHANNEL_REASON: &str = "Invalid channel ID";

    /// Internal error, sent when the relay cannot admit an upgraded connection.
    pub const INTERNAL_ERROR: u16 = 1011;
}

/// Server-originated control frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlFrame {
    /// Connection acknowledgement, sent once before any relayed message.
    #[serde(rename = "connected")]
    Connected {
        /// Human-readable status.
        message: String,
        /// The validated channel key the connection joined.
        channel_id: String,
    },
}

impl ControlFrame {
    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(channel_id: impl Into<String>) -> Self {
        ControlFrame::Connected {
            message: CONNECTED_MESSAGE.to_string(),
            channel_id: channel_id.into(),
        }
    }

    /// Get the wire discriminator of this frame.
    #[must_use]
    pub fn frame_type(&self) -> &'static str {
        match self {
            ControlFrame::Connected { .. } => "connected",
        }
    }
}

/// Error frame returned to a sender whose frame failed to decode.
///
/// Carries the raw offending input so the client can tell which of its
/// frames was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeErrorFrame {
    /// Error discriminator.
    pub error: String,
    /// The raw text as received.
    pub received: String,
}

impl DecodeErrorFrame {
    /// Create an "Invalid JSON" error frame echoing `received`.
    #[must_use]
    pub fn invalid_json(received: impl Into<String>) -> Self {
        Self {
            error: INVALID_JSON.to_string(),
            received: received.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connected_frame_shape() {
        let frame = ControlFrame::connected("0b7c3f8e-3f43-4a4e-9d0c-6c1b7e2a9f10");
        assert_eq!(frame.frame_type(), "connected");

        let text = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            text,
            r#"{"type":"connected","message":"WebSocket connected successfully","channel_id":"0b7c3f8e-3f43-4a4e-9d0c-6c1b7e2a9f10"}"#
        );
    }

    #[test]
    fn test_decode_error_frame_shape() {
        let frame = DecodeErrorFrame::invalid_json("not-json");
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"error": "Invalid JSON", "received": "not-json"})
        );
    }

    #[test]
    fn test_connected_frame_parses_back() {
        let parsed: ControlFrame = serde_json::from_value(json!({
            "type": "connected",
            "message": "hello",
            "channel_id": "k",
        }))
        .unwrap();

        assert_eq!(
            parsed,
            ControlFrame::Connected {
                message: "hello".into(),
                channel_id: "k".into(),
            }
        );
    }
}
