//! WebSocket transport implementation.
//!
//! Adapts a socket upgraded by axum into the relay's connection halves. The
//! HTTP side (routing, upgrade, message size limits) stays with the server.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use teamchat_protocol::EncodedFrame;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::traits::{Connection, ConnectionId, FrameSource, TransportError};

/// Split an upgraded WebSocket into its outbound and inbound halves.
#[must_use]
pub fn split(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
) -> (Arc<WebSocketConnection>, WebSocketSource) {
    let (sink, stream) = socket.split();
    let id = ConnectionId::generate();
    let is_open = Arc::new(AtomicBool::new(true));

    let connection = Arc::new(WebSocketConnection {
        id: id.clone(),
        sink: Mutex::new(sink),
        remote_addr,
        is_open: Arc::clone(&is_open),
    });
    let source = WebSocketSource {
        id,
        stream,
        is_open,
    };

    (connection, source)
}

/// Outbound half of a WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, Message>>,
    remote_addr: Option<SocketAddr>,
    is_open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, frame: EncodedFrame) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame.as_str().to_owned()))
            .await
            .map_err(|e| {
                self.is_open.store(false, Ordering::SeqCst);
                TransportError::SendFailed(e.to_string())
            })
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        };

        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

/// Inbound half of a WebSocket connection.
pub struct WebSocketSource {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    is_open: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    // Binary frames are accepted when they carry UTF-8 text
                    return match String::from_utf8(data) {
                        Ok(text) => Ok(Some(text)),
                        Err(e) => {
                            warn!(connection = %self.id, "Binary frame is not UTF-8");
                            self.is_open.store(false, Ordering::SeqCst);
                            Err(TransportError::ReceiveFailed(e.to_string()))
                        }
                    };
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    trace!(connection = %self.id, "Control frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(
                        connection = %self.id,
                        code = ?frame.as_ref().map(|f| f.code),
                        "Received close frame"
                    );
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return Ok(None);
                }
            }
        }
    }
}
