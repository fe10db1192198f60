//! # teamchat-protocol
//!
//! Wire protocol definitions for the TeamChat channel relay.
//!
//! Frames are JSON text. The relay is transparent for client payloads: a
//! decoded object is re-serialized without any envelope. The server adds only
//! two frames of its own.
//!
//! ## Frame Types
//!
//! - `ControlFrame::Connected` - Acknowledgement sent once on join
//! - `DecodeErrorFrame` - Echo of input that failed to decode
//!
//! ## Example
//!
//! ```rust
//! use teamchat_protocol::codec;
//!
//! let payload = codec::decode(r#"{"type":"text","content":"hi"}"#).unwrap();
//! let frame = codec::encode(&payload).unwrap();
//! assert_eq!(frame.as_str(), r#"{"type":"text","content":"hi"}"#);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, EncodedFrame, Payload, ProtocolError};
pub use frames::{close_code, ControlFrame, DecodeErrorFrame, CONNECTED_MESSAGE, INVALID_JSON};
