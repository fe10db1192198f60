//! Connection registry.
//!
//! Tracks, per channel, the connections currently joined to it. The registry
//! is the only shared mutable state of the relay; it is owned explicitly and
//! handed to whoever needs it.

use crate::channel::ChannelKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use teamchat_transport::{Connection, ConnectionId};
use thiserror::Error;
use tracing::{debug, error};

/// A registered connection.
pub type Member = Arc<dyn Connection>;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The connection is already a member of a channel.
    #[error("Connection {connection} is already registered on channel {channel}")]
    AlreadyRegistered {
        /// The offending connection.
        connection: ConnectionId,
        /// The channel it is registered on.
        channel: ChannelKey,
    },
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of channels with at least one member.
    pub channel_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
}

/// Per-channel membership table.
///
/// Each channel's member list sits behind its own map shard lock, so
/// membership changes and snapshots of one channel are serialized while
/// unrelated channels rarely contend. A channel key is present only while
/// its member list is non-empty.
#[derive(Default)]
pub struct ConnectionRegistry {
    /// Members indexed by channel, in join order.
    channels: DashMap<ChannelKey, Vec<Member>>,
    /// Reverse index: connection -> channel it joined.
    memberships: DashMap<ConnectionId, ChannelKey>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection on a channel, creating the channel if needed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if the connection is
    /// already a member of any channel. This is a programming error on the
    /// caller's side; the registry is left untouched.
    pub fn register(&self, channel: ChannelKey, connection: Member) -> Result<(), RegistryError> {
        let id = connection.id().clone();

        match self.memberships.entry(id.clone()) {
            Entry::Occupied(existing) => {
                let current = *existing.get();
                error!(
                    channel = %channel,
                    current = %current,
                    connection = %id,
                    "Connection registered twice"
                );
                return Err(RegistryError::AlreadyRegistered {
                    connection: id,
                    channel: current,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(channel);
            }
        }

        let mut members = self.channels.entry(channel).or_insert_with(|| {
            debug!(channel = %channel, "Creating channel");
            Vec::new()
        });
        members.push(connection);

        debug!(
            channel = %channel,
            connection = %id,
            members = members.len(),
            "Registered"
        );

        Ok(())
    }

    /// Remove a connection from a channel.
    ///
    /// Returns `true` if this call removed it. Removing a connection that is
    /// not (or no longer) a member is a no-op, so racing callers are safe and
    /// exactly one of them observes `true`.
    pub fn unregister(&self, channel: &ChannelKey, connection: &ConnectionId) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(mut members) => {
                let before = members.len();
                members.retain(|m| m.id() != connection);
                let removed = members.len() != before;
                if removed {
                    debug!(
                        channel = %channel,
                        connection = %connection,
                        members = members.len(),
                        "Unregistered"
                    );
                }
                removed
            }
            None => false,
        };

        if removed {
            // Re-checked under the shard lock: a concurrent register may
            // have refilled the list.
            if self
                .channels
                .remove_if(channel, |_, members| members.is_empty())
                .is_some()
            {
                debug!(channel = %channel, "Deleted empty channel");
            }
            self.memberships
                .remove_if(connection, |_, joined| joined == channel);
        }

        removed
    }

    /// Get a point-in-time copy of a channel's members, in join order.
    #[must_use]
    pub fn members(&self, channel: &ChannelKey) -> Vec<Member> {
        self.channels
            .get(channel)
            .map(|members| members.value().clone())
            .unwrap_or_default()
    }

    /// Get the number of members of a channel.
    #[must_use]
    pub fn member_count(&self, channel: &ChannelKey) -> usize {
        self.channels.get(channel).map(|m| m.len()).unwrap_or(0)
    }

    /// Check if a channel has any members.
    #[must_use]
    pub fn contains_channel(&self, channel: &ChannelKey) -> bool {
        self.channels.contains_key(channel)
    }

    /// Get the channel a connection is registered on.
    #[must_use]
    pub fn channel_of(&self, connection: &ConnectionId) -> Option<ChannelKey> {
        self.memberships.get(connection).map(|c| *c.value())
    }

    /// Get all channels with at least one member.
    #[must_use]
    pub fn channel_keys(&self) -> Vec<ChannelKey> {
        self.channels.iter().map(|e| *e.key()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            channel_count: self.channels.len(),
            connection_count: self.memberships.len(),
        }
    }
}
