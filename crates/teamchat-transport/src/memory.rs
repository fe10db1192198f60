//! In-process transport.
//!
//! Connections are pairs of unbounded channels: a [`MemoryClient`] plays the
//! remote peer while the relay sees an ordinary [`Connection`] and
//! [`FrameSource`]. Used by tests and benches, and by embedders that want to
//! drive the relay without a network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use teamchat_protocol::EncodedFrame;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::traits::{Connection, ConnectionId, FrameSource, Incoming, Transport, TransportError};

/// An event observed by the client side of a memory connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A text frame sent by the relay.
    Frame(EncodedFrame),
    /// The relay closed the connection.
    Closed {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

enum Inbound {
    Text(String),
    Fail(String),
}

/// Open a memory connection.
///
/// Returns the client handle together with the relay-side halves.
#[must_use]
pub fn connect() -> (MemoryClient, Arc<MemoryConnection>, MemorySource) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let id = ConnectionId::generate();

    let client = MemoryClient {
        id: id.clone(),
        inbound: Some(inbound_tx),
        outbound: outbound_rx,
    };
    let connection = Arc::new(MemoryConnection {
        id,
        outbound: outbound_tx,
        is_open: AtomicBool::new(true),
    });
    let source = MemorySource {
        inbound: inbound_rx,
    };

    (client, connection, source)
}

/// Client side of a memory connection.
pub struct MemoryClient {
    id: ConnectionId,
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
}

impl MemoryClient {
    /// Get the ID of the relay-side connection.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    /// Send a text frame to the relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the client already closed its sending side or the
    /// relay dropped the connection.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.push(Inbound::Text(text.into()))
    }

    /// Make the relay's next receive fail with a transport error.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay dropped the connection.
    pub fn inject_error(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.push(Inbound::Fail(reason.into()))
    }

    /// Close the sending side; the relay observes a graceful close.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Stop accepting frames from the relay; further sends to this client fail.
    pub fn stop_reading(&mut self) {
        self.outbound.close();
    }

    /// Wait for the next event from the relay.
    ///
    /// Returns `None` once the relay dropped the connection and every event
    /// has been consumed.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.outbound.recv().await
    }

    /// Wait for the next event and return its text.
    ///
    /// Returns `None` if the next event is not a text frame.
    pub async fn recv_text(&mut self) -> Option<String> {
        match self.recv().await {
            Some(ClientEvent::Frame(frame)) => Some(frame.as_str().to_owned()),
            _ => None,
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        self.outbound.try_recv().ok()
    }

    fn push(&self, item: Inbound) -> Result<(), TransportError> {
        let inbound = self.inbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        inbound
            .send(item)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Relay-side outbound half of a memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    is_open: AtomicBool,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, frame: EncodedFrame) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        self.outbound.send(ClientEvent::Frame(frame)).map_err(|_| {
            self.is_open.store(false, Ordering::SeqCst);
            TransportError::ConnectionClosed
        })
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        // The client may already be gone
        let _ = self.outbound.send(ClientEvent::Closed {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

/// Relay-side inbound half of a memory connection.
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Text(text)) => Ok(Some(text)),
            Some(Inbound::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// A transport whose connections are opened in-process through a
/// [`MemoryConnector`].
pub struct MemoryTransport {
    pending: Mutex<mpsc::UnboundedReceiver<Incoming>>,
}

/// Opens connections on a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryConnector {
    pending: mpsc::UnboundedSender<Incoming>,
}

impl MemoryTransport {
    /// Create a transport and the connector feeding it.
    ///
    /// The transport stops accepting once every connector is dropped.
    #[must_use]
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                pending: Mutex::new(rx),
            },
            MemoryConnector { pending: tx },
        )
    }
}

impl MemoryConnector {
    /// Open a connection to the channel named by `channel_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has been dropped.
    pub fn connect(&self, channel_key: impl Into<String>) -> Result<MemoryClient, TransportError> {
        let (client, connection, source) = connect();
        let incoming = Incoming {
            connection,
            source: Box::new(source),
            channel_key: channel_key.into(),
        };
        debug!(connection = %client.connection_id(), "Memory connection opened");
        self.pending
            .send(incoming)
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(client)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn accept(&self) -> Result<Option<Incoming>, TransportError> {
        Ok(self.pending.lock().await.recv().await)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_to_relay() {
        let (client, _conn, mut source) = connect();

        client.send_text("hello").unwrap();
        assert_eq!(source.recv().await.unwrap(), Some("hello".to_string()));

        drop(client);
        assert_eq!(source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relay_to_client() {
        let (mut client, conn, _source) = connect();

        conn.send(EncodedFrame::from("{}")).await.unwrap();
        assert_eq!(client.recv_text().await, Some("{}".to_string()));
        assert!(client.try_recv().is_none());
        assert_eq!(conn.remote_addr().as_deref(), Some("memory"));
    }

    #[tokio::test]
    async fn test_send_after_client_stops_reading() {
        let (mut client, conn, _source) = connect();
        client.stop_reading();

        assert!(matches!(
            conn.send(EncodedFrame::from("{}")).await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_close_notifies_client_once() {
        let (mut client, conn, _source) = connect();

        conn.close(1008, "bye").await.unwrap();
        conn.close(1008, "bye").await.unwrap();

        assert_eq!(
            client.recv().await,
            Some(ClientEvent::Closed {
                code: 1008,
                reason: "bye".to_string()
            })
        );
        drop(conn);
        assert_eq!(client.recv().await, None);
    }

    #[tokio::test]
    async fn test_injected_error() {
        let (client, _conn, mut source) = connect();
        client.inject_error("reset").unwrap();
        assert!(matches!(
            source.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_accept() {
        let (transport, connector) = MemoryTransport::new();
        let client = connector.connect("key").unwrap();

        let incoming = transport.accept().await.unwrap().unwrap();
        assert_eq!(incoming.channel_key, "key");
        assert_eq!(incoming.connection.id(), client.connection_id());

        drop(connector);
        assert!(transport.accept().await.unwrap().is_none());
    }
}
