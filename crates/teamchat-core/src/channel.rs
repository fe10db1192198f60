//! Channel keys.
//!
//! A channel key names a broadcast scope. Keys are UUIDs; the relay checks
//! only that the key is well formed; whether the caller may join is decided
//! elsewhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned for a malformed channel key.
#[derive(Debug, Error)]
#[error("Invalid channel key {raw:?}: {source}")]
pub struct ChannelKeyError {
    raw: String,
    #[source]
    source: uuid::Error,
}

impl ChannelKeyError {
    /// Get the rejected input.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Identifier of a broadcast scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(Uuid);

impl ChannelKey {
    /// Parse a channel key.
    ///
    /// Accepts the hyphenated, simple, braced and URN forms of a UUID.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not a UUID.
    pub fn parse(raw: &str) -> Result<Self, ChannelKeyError> {
        Uuid::parse_str(raw).map(Self).map_err(|source| ChannelKeyError {
            raw: raw.to_string(),
            source,
        })
    }

    /// Generate a random channel key.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lowercase hyphenated form
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ChannelKey {
    type Err = ChannelKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Uuid> for ChannelKey {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
