//! # teamchat-transport
//!
//! Transport abstraction layer for the TeamChat relay.
//!
//! This crate provides a unified interface over the streams the relay talks to:
//!
//! - **WebSocket** - Sockets upgraded by axum
//! - **Memory** - In-process channel pairs for tests and embedding
//!
//! ## Transport Abstraction
//!
//! Every connection is split into a shared outbound half implementing
//! [`Connection`] and an owned inbound half implementing [`FrameSource`],
//! so broadcasters can write to a connection while its own task reads it.
//!
//! ```rust,ignore
//! use teamchat_transport::{Connection, FrameSource};
//!
//! async fn echo(conn: &dyn Connection, mut source: impl FrameSource) {
//!     while let Ok(Some(text)) = source.recv().await {
//!         let _ = conn.send(text.into()).await;
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, FrameSource, Incoming, Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketSource};
