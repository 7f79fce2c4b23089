// ── Channel identity ──
//
// A conversation is addressed by (channel id, channel type). Every map
// in the core keys on `ChannelKey`; the `"{id}:{type}"` text form exists
// for logs, CLI arguments and anything that needs a flat string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One-to-one direct channel.
pub const CHANNEL_TYPE_PERSON: u8 = 1;
/// Multi-member group channel.
pub const CHANNEL_TYPE_GROUP: u8 = 2;
/// Customer-service channel between a visitor and the staff pool.
pub const CHANNEL_TYPE_CUSTOMER_SERVICE: u8 = 251;

/// Canonical identity of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    channel_id: String,
    channel_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelKeyError {
    #[error("channel key {0:?} has no ':' separator")]
    MissingSeparator(String),
    #[error("channel key {0:?} has a non-numeric channel type")]
    InvalidType(String),
}

impl ChannelKey {
    pub fn new(channel_id: impl Into<String>, channel_type: u8) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_type,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn channel_type(&self) -> u8 {
        self.channel_type
    }

    /// Encode as `"{channel_id}:{channel_type}"`.
    ///
    /// The type never contains `':'`, so splitting on the last separator
    /// recovers the pair even when the id itself contains colons.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.channel_id, self.channel_type)
    }

    /// Parse the text form produced by [`encode`](Self::encode).
    pub fn decode(s: &str) -> Result<Self, ChannelKeyError> {
        let (id, ty) = s
            .rsplit_once(':')
            .ok_or_else(|| ChannelKeyError::MissingSeparator(s.to_owned()))?;
        let channel_type = ty
            .parse()
            .map_err(|_| ChannelKeyError::InvalidType(s.to_owned()))?;
        Ok(Self::new(id, channel_type))
    }

    /// A key with an empty id cannot address anything.
    pub fn is_valid(&self) -> bool {
        !self.channel_id.trim().is_empty()
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.channel_type)
    }
}

impl FromStr for ChannelKey {
    type Err = ChannelKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
