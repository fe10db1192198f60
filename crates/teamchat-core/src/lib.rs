//! # teamchat-core
//!
//! Channel connection registry and broadcast protocol for the TeamChat relay.
//!
//! This crate provides the realtime core:
//!
//! - **ChannelKey** - Identifier of a broadcast scope
//! - **ConnectionRegistry** - Per-channel membership tracking
//! - **ChannelBroadcaster** - Receive loop and fan-out to channel peers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────────────┐     ┌──────────────────────┐
//! │  Connection │────▶│ ChannelBroadcaster │────▶│ ConnectionRegistry   │
//! └─────────────┘     └────────────────────┘     └──────────────────────┘
//!        ▲                      │
//!        └──────── fan-out ─────┘
//! ```
//!
//! A connection's sender never receives its own frames back.

pub mod broadcaster;
pub mod channel;
pub mod registry;

pub use broadcaster::{
    BroadcastReport, ChannelBroadcaster, CloseReason, ConnectionState, SessionSummary,
};
pub use channel::{ChannelKey, ChannelKeyError};
pub use registry::{ConnectionRegistry, Member, RegistryError, RegistryStats};
