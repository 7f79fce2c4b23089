// ── Conversations ──

use serde::{Deserialize, Serialize};

use super::channel::ChannelKey;
use super::message::{Message, PayloadKind};

/// A conversation list entry.
///
/// `tags` is `None` until channel metadata has been observed; an empty
/// vector means the metadata arrived and the channel has no tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub channel_key: ChannelKey,
    pub last_message_summary: String,
    /// Epoch seconds of the latest message.
    pub last_timestamp_secs: i64,
    pub unread_count: u32,
    pub payload_kind: PayloadKind,
    pub priority: i32,
    pub tags: Option<Vec<String>>,
}

impl Conversation {
    pub fn new(channel_key: ChannelKey) -> Self {
        Self {
            channel_key,
            last_message_summary: String::new(),
            last_timestamp_secs: 0,
            unread_count: 0,
            payload_kind: PayloadKind::Text,
            priority: 0,
            tags: None,
        }
    }

    /// Realtime view of a conversation derived from its newest message.
    pub fn from_message(message: &Message, unread_count: u32) -> Self {
        Self {
            channel_key: message.channel.clone(),
            last_message_summary: message.summary(),
            last_timestamp_secs: message.timestamp,
            unread_count,
            payload_kind: message.kind,
            priority: 0,
            tags: None,
        }
    }

    /// Whether the entry has anything to show in a list.
    ///
    /// A streaming placeholder counts even before its first delta.
    pub fn has_visible_content(&self) -> bool {
        !self.last_message_summary.trim().is_empty() || self.payload_kind == PayloadKind::Streaming
    }

    /// Whether `self`, as a newer observation, should replace `current`.
    ///
    /// Equal timestamps with a different summary count as newer so that
    /// incremental stream previews land within the same second.
    pub fn supersedes(&self, current: &Self) -> bool {
        self.last_timestamp_secs > current.last_timestamp_secs
            || (self.last_timestamp_secs == current.last_timestamp_secs
                && self.last_message_summary != current.last_message_summary)
    }
}
