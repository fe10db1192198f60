//! Channel broadcaster.
//!
//! Drives one connection from join to close: validates the channel key,
//! acknowledges the join, registers the connection, then relays every decoded
//! frame to the other members of the channel until the connection goes away.
//!
//! Broadcasts run inside the sending connection's task. A fan-out to many
//! recipients delays that sender's next receive but never another
//! connection's loop.
//!
//! A member pruned by someone else's broadcast leaves the registry at once,
//! but its own task stays parked in `recv` until its peer sends another frame,
//! closes, or the transport reports an error. No frame reaches it meanwhile.

use crate::channel::ChannelKey;
use crate::registry::{ConnectionRegistry, Member};
use futures_util::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use teamchat_protocol::{
    close_code, codec, ControlFrame, DecodeErrorFrame, EncodedFrame, ProtocolError,
};
use teamchat_transport::{
    Connection, ConnectionId, FrameSource, Incoming, Transport, TransportError,
};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, channel key not yet validated.
    Connecting,
    /// Registered and relaying.
    Open,
    /// Receive loop exited, cleanup pending.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Check whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Connecting, ConnectionState::Closed)
                | (ConnectionState::Open, ConnectionState::Closing)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }
}

/// Why a connection left the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the connection.
    PeerClosed,
    /// Receiving failed at the transport level.
    TransportError,
    /// Sending to the connection failed, or it was pruned by a broadcast.
    SendFailed,
    /// The channel key did not parse; nothing was registered.
    InvalidChannelKey,
    /// The acknowledgement frame could not be delivered.
    AckFailed,
    /// The connection was already registered elsewhere.
    AlreadyRegistered,
}

impl CloseReason {
    /// Get a short label, suitable for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::SendFailed => "send_failed",
            CloseReason::InvalidChannelKey => "invalid_channel_key",
            CloseReason::AckFailed => "ack_failed",
            CloseReason::AlreadyRegistered => "already_registered",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Recipients the frame was delivered to.
    pub delivered: usize,
    /// Recipients whose send failed and that were removed from the channel.
    pub pruned: usize,
}

/// Summary of a finished connection.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// The connection.
    pub connection: ConnectionId,
    /// The channel it joined, if the key was valid.
    pub channel: Option<ChannelKey>,
    /// Why it left.
    pub close_reason: CloseReason,
    /// Frames relayed to peers.
    pub frames_relayed: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Peers pruned while relaying this connection's frames.
    pub peers_pruned: u64,
}

/// Removes the connection from its channel when dropped, on every exit path.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    channel: ChannelKey,
    connection: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.unregister(&self.channel, &self.connection) {
            debug!(
                channel = %self.channel,
                connection = %self.connection,
                "Cleaned up connection"
            );
        }
    }
}

/// Tracks the state of one connection and traces its transitions.
struct Lifecycle<'a> {
    connection: &'a ConnectionId,
    state: ConnectionState,
}

impl<'a> Lifecycle<'a> {
    fn new(connection: &'a ConnectionId) -> Self {
        Self {
            connection,
            state: ConnectionState::Connecting,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(
            connection = %self.connection,
            from = ?self.state,
            to = ?next,
            "State transition"
        );
        self.state = next;
    }
}

/// Relays frames between the connections of each channel.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct ChannelBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl ChannelBroadcaster {
    /// Create a broadcaster over `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Get the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Accept connections from `transport` until it is exhausted, running
    /// each one on its own task.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails.
    pub async fn serve<T: Transport + ?Sized>(&self, transport: &T) -> Result<(), TransportError> {
        info!(transport = transport.name(), "Accepting connections");

        while let Some(incoming) = transport.accept().await? {
            let broadcaster = self.clone();
            tokio::spawn(async move {
                let Incoming {
                    connection,
                    source,
                    channel_key,
                } = incoming;
                broadcaster
                    .handle_connect(connection, source, &channel_key)
                    .await;
            });
        }

        info!(transport = transport.name(), "Transport exhausted");
        Ok(())
    }

    /// Run a freshly upgraded connection until it closes.
    ///
    /// `raw_key` is the channel key from the connect request. If it is
    /// malformed the connection is closed with a policy-violation code and
    /// nothing is registered.
    pub async fn handle_connect<S: FrameSource>(
        &self,
        connection: Arc<dyn Connection>,
        mut source: S,
        raw_key: &str,
    ) -> SessionSummary {
        let id = connection.id().clone();
        let mut lifecycle = Lifecycle::new(&id);
        let mut summary = SessionSummary {
            connection: id.clone(),
            channel: None,
            close_reason: CloseReason::PeerClosed,
            frames_relayed: 0,
            decode_errors: 0,
            peers_pruned: 0,
        };

        let channel = match ChannelKey::parse(raw_key) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(connection = %id, error = %e, "Rejecting connection");
                close_quietly(
                    connection.as_ref(),
                    close_code::POLICY_VIOLATION,
                    close_code::INVALID_CHANNEL_REASON,
                )
                .await;
                lifecycle.advance(ConnectionState::Closed);
                summary.close_reason = CloseReason::InvalidChannelKey;
                return summary;
            }
        };
        summary.channel = Some(channel);

        // The ack goes out before registration so no relayed frame can precede it
        let ack = match codec::encode(&ControlFrame::connected(channel.to_string())) {
            Ok(frame) => frame,
            Err(e) => {
                error!(connection = %id, error = %e, "Failed to encode acknowledgement");
                close_quietly(
                    connection.as_ref(),
                    close_code::INTERNAL_ERROR,
                    "Acknowledgement failed",
                )
                .await;
                lifecycle.advance(ConnectionState::Closed);
                summary.close_reason = CloseReason::AckFailed;
                return summary;
            }
        };
        if let Err(e) = connection.send(ack).await {
            warn!(connection = %id, error = %e, "Failed to send acknowledgement");
            lifecycle.advance(ConnectionState::Closed);
            summary.close_reason = CloseReason::AckFailed;
            return summary;
        }

        if let Err(e) = self.registry.register(channel, Arc::clone(&connection)) {
            error!(connection = %id, error = %e, "Refusing duplicate connection");
            close_quietly(
                connection.as_ref(),
                close_code::INTERNAL_ERROR,
                "Connection already registered",
            )
            .await;
            lifecycle.advance(ConnectionState::Closed);
            summary.close_reason = CloseReason::AlreadyRegistered;
            return summary;
        }

        let registration = Registration {
            registry: Arc::clone(&self.registry),
            channel,
            connection: id.clone(),
        };
        lifecycle.advance(ConnectionState::Open);
        debug!(
            channel = %channel,
            connection = %id,
            remote = connection.remote_addr().as_deref().unwrap_or("-"),
            "Connection open"
        );

        let reason = self
            .receive_loop(connection.as_ref(), &mut source, channel, &mut summary)
            .await;
        summary.close_reason = reason;

        lifecycle.advance(ConnectionState::Closing);
        drop(registration);
        lifecycle.advance(ConnectionState::Closed);

        debug!(
            channel = %channel,
            connection = %id,
            reason = %summary.close_reason,
            relayed = summary.frames_relayed,
            decode_errors = summary.decode_errors,
            "Connection closed"
        );

        summary
    }

    async fn receive_loop<S: FrameSource>(
        &self,
        connection: &dyn Connection,
        source: &mut S,
        channel: ChannelKey,
        summary: &mut SessionSummary,
    ) -> CloseReason {
        let id = connection.id();

        loop {
            let text = match source.recv().await {
                Ok(Some(text)) => text,
                Ok(None) => return CloseReason::PeerClosed,
                Err(e) => {
                    warn!(connection = %id, error = %e, "Receive failed");
                    return CloseReason::TransportError;
                }
            };

            // A broadcast by another member may have pruned this connection
            if !connection.is_open() {
                debug!(connection = %id, "Connection pruned, dropping frame");
                return CloseReason::SendFailed;
            }

            match codec::decode(&text) {
                Ok(payload) => {
                    trace!(
                        channel = %channel,
                        connection = %id,
                        message_type = codec::message_type(&payload).unwrap_or("-"),
                        "Relaying frame"
                    );
                    match self.broadcast(&channel, &payload, Some(id)).await {
                        Ok(report) => {
                            summary.frames_relayed += 1;
                            summary.peers_pruned += report.pruned as u64;
                        }
                        Err(e) => warn!(connection = %id, error = %e, "Failed to relay frame"),
                    }
                }
                Err(e) => {
                    summary.decode_errors += 1;
                    debug!(connection = %id, error = %e, "Invalid frame");

                    let reply = match codec::encode(&DecodeErrorFrame::invalid_json(text)) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!(connection = %id, error = %e, "Failed to encode error frame");
                            continue;
                        }
                    };
                    if let Err(e) = connection.send(reply).await {
                        warn!(connection = %id, error = %e, "Failed to send error frame");
                        return CloseReason::SendFailed;
                    }
                }
            }
        }
    }

    /// Serialize `message` once and send it to every member of `channel`
    /// except `excluding`.
    ///
    /// Members whose send fails are removed from the channel after the sweep;
    /// they do not stop delivery to the others.
    ///
    /// # Errors
    ///
    /// Returns an error if `message` cannot be serialized; nothing is sent.
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        channel: &ChannelKey,
        message: &T,
        excluding: Option<&ConnectionId>,
    ) -> Result<BroadcastReport, ProtocolError> {
        let frame = codec::encode(message)?;
        Ok(self.broadcast_frame(channel, frame, excluding).await)
    }

    /// Send an already encoded frame to every member of `channel` except
    /// `excluding`. See [`broadcast`](Self::broadcast).
    pub async fn broadcast_frame(
        &self,
        channel: &ChannelKey,
        frame: EncodedFrame,
        excluding: Option<&ConnectionId>,
    ) -> BroadcastReport {
        let recipients: Vec<Member> = self
            .registry
            .members(channel)
            .into_iter()
            .filter(|m| Some(m.id()) != excluding)
            .collect();

        let results = join_all(recipients.iter().map(|member| member.send(frame.clone()))).await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (member, result) in recipients.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        channel = %channel,
                        connection = %member.id(),
                        error = %e,
                        "Broadcast send failed"
                    );
                    failed.push(member.id());
                }
            }
        }

        for connection in failed {
            if self.registry.unregister(channel, connection) {
                report.pruned += 1;
            }
        }

        trace!(
            channel = %channel,
            delivered = report.delivered,
            pruned = report.pruned,
            bytes = frame.len(),
            "Broadcast"
        );

        report
    }
}

async fn close_quietly(connection: &dyn Connection, code: u16, reason: &str) {
    if let Err(e) = connection.close(code, reason).await {
        debug!(connection = %connection.id(), error = %e, "Close failed");
    }
}
