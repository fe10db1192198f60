//! Transport abstraction traits for the relay.
//!
//! A connection is split in two halves. The outbound half ([`Connection`]) is
//! shared: the registry holds it and any broadcaster may send through it. The
//! inbound half ([`FrameSource`]) is owned by the single task running that
//! connection's receive loop.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use teamchat_protocol::EncodedFrame;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The outbound half of an open connection.
///
/// Implementations must allow concurrent callers: the owning receive loop
/// and any number of broadcasters may send at the same time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Send a text frame to the connection.
    async fn send(&self, frame: EncodedFrame) -> Result<(), TransportError>;

    /// Close the connection with a close code and reason.
    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

/// The inbound half of an open connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next text frame.
    ///
    /// Returns `None` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        (**self).recv().await
    }
}

/// A connection handed over by a transport after its handshake completed.
pub struct Incoming {
    /// Outbound half.
    pub connection: Arc<dyn Connection>,
    /// Inbound half.
    pub source: Box<dyn FrameSource>,
    /// Raw channel key taken from the connect request, not yet validated.
    pub channel_key: String,
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("connection", self.connection.id())
            .field("channel_key", &self.channel_key)
            .finish()
    }
}

/// A transport that can accept connections.
///
/// Transports are responsible for the handshake/upgrade; what they hand over
/// is already open.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept the next connection.
    ///
    /// Returns `None` once the transport will never produce another
    /// connection.
    async fn accept(&self) -> Result<Option<Incoming>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}
