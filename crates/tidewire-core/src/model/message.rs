// ── Messages ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::ChannelKey;

/// Content kind carried in a message payload's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PayloadKind {
    #[default]
    Text,
    Image,
    Voice,
    Video,
    File,
    /// Placeholder for an assistant reply whose content arrives as
    /// stream deltas.
    Streaming,
    Other(i32),
}

impl PayloadKind {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Text,
            2 => Self::Image,
            4 => Self::Voice,
            5 => Self::Video,
            8 => Self::File,
            100 => Self::Streaming,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Text => 1,
            Self::Image => 2,
            Self::Voice => 4,
            Self::Video => 5,
            Self::File => 8,
            Self::Streaming => 100,
            Self::Other(code) => code,
        }
    }
}

/// A chat message in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Option<String>,
    pub message_seq: u64,
    /// Client-generated correlation id. Streamed replies share it with
    /// their deltas.
    pub client_msg_no: Option<String>,
    pub channel: ChannelKey,
    pub from_uid: Option<String>,
    /// Epoch seconds.
    pub timestamp: i64,
    pub kind: PayloadKind,
    /// Text body, when the payload has one.
    pub content: Option<String>,
    pub payload: serde_json::Value,
}

/// A window of channel history, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHistory {
    pub messages: Vec<Message>,
    /// More messages exist beyond this window in the pull direction.
    pub more: bool,
}

impl Message {
    /// One-line preview used for conversation lists.
    pub fn summary(&self) -> String {
        let text = self.content.as_deref().unwrap_or_default().trim();
        match self.kind {
            PayloadKind::Text | PayloadKind::Streaming => text.to_owned(),
            PayloadKind::Image => "[Image]".into(),
            PayloadKind::Voice => "[Voice]".into(),
            PayloadKind::Video => "[Video]".into(),
            PayloadKind::File => "[File]".into(),
            PayloadKind::Other(_) if !text.is_empty() => text.to_owned(),
            PayloadKind::Other(_) => "[Unsupported message]".into(),
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }

    pub fn is_streaming(&self) -> bool {
        self.kind == PayloadKind::Streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(kind: PayloadKind, content: Option<&str>) -> Message {
        Message {
            message_id: None,
            message_seq: 0,
            client_msg_no: None,
            channel: ChannelKey::new("v", 251),
            from_uid: None,
            timestamp: 1_700_000_000,
            kind,
            content: content.map(String::from),
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn payload_codes_map_both_ways() {
        for code in [1, 2, 4, 5, 8, 100, 42] {
            assert_eq!(PayloadKind::from_code(code).code(), code);
        }
        assert_eq!(PayloadKind::from_code(100), PayloadKind::Streaming);
    }

    #[test]
    fn summary_uses_placeholders_for_media() {
        assert_eq!(message(PayloadKind::Image, None).summary(), "[Image]");
        assert_eq!(message(PayloadKind::Text, Some(" hi ")).summary(), "hi");
        assert_eq!(message(PayloadKind::Streaming, None).summary(), "");
        assert_eq!(
            message(PayloadKind::Other(9), None).summary(),
            "[Unsupported message]"
        );
    }
}
