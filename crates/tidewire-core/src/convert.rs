// ── Wire-to-domain conversions ──
//
// Bridges raw `tidewire_api` records into canonical `model` types.
// Records missing their channel identity cannot be placed in any map and
// are rejected with `ConvertError`; callers log and drop them. Custom
// events are normalized into typed envelopes by their `event_type`.

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use tidewire_api::{ChannelInfo, RawConversation, RawCustomEvent, RawMessage, RawTag};

use crate::model::{
    ChannelKey, ChannelMetadata, Conversation, InboundEnvelope, Message, PayloadKind, Presence,
    ProfileUpdate, StreamDelta, StreamEnd,
};

// ── Custom event markers ────────────────────────────────────────────

pub const EVENT_STREAM_START: &str = "___TextMessageStart";
pub const EVENT_STREAM_CONTENT: &str = "___TextMessageContent";
pub const EVENT_STREAM_END: &str = "___TextMessageEnd";
pub const EVENT_VISITOR_ONLINE: &str = "visitor.online";
pub const EVENT_VISITOR_OFFLINE: &str = "visitor.offline";
pub const EVENT_PROFILE_UPDATED: &str = "visitor.profile.updated";

/// Reason code used when an end event carries a bare error string.
const END_REASON_ERROR: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("record has no channel id")]
    MissingChannelId,
    #[error("record for channel {channel_id:?} has no channel type")]
    MissingChannelType { channel_id: String },
}

// ── Helpers ────────────────────────────────────────────────────────

fn channel_key(id: Option<&str>, channel_type: Option<u8>) -> Result<ChannelKey, ConvertError> {
    let id = id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConvertError::MissingChannelId)?;
    let channel_type = channel_type.ok_or_else(|| ConvertError::MissingChannelType {
        channel_id: id.to_owned(),
    })?;
    Ok(ChannelKey::new(id, channel_type))
}

/// Like [`channel_key`] but for optional context on events.
fn optional_key(id: Option<&str>, channel_type: Option<u8>) -> Option<ChannelKey> {
    channel_key(id, channel_type).ok()
}

fn tag_ids(tags: Option<Vec<RawTag>>) -> Option<Vec<String>> {
    tags.map(|tags| tags.into_iter().map(|t| t.id).collect())
}

// ── Messages ────────────────────────────────────────────────────────

impl TryFrom<RawMessage> for Message {
    type Error = ConvertError;

    fn try_from(m: RawMessage) -> Result<Self, Self::Error> {
        let channel = channel_key(m.channel_id.as_deref(), m.channel_type)?;
        let kind = m
            .payload
            .get("type")
            .and_then(serde_json::Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .map_or(PayloadKind::Text, PayloadKind::from_code);
        let content = m
            .payload
            .get("content")
            .and_then(serde_json::Value::as_str)
            .map(String::from);

        Ok(Self {
            message_id: m.message_id,
            message_seq: m.message_seq,
            client_msg_no: m.client_msg_no.filter(|s| !s.is_empty()),
            channel,
            from_uid: m.from_uid,
            timestamp: m.timestamp,
            kind,
            content,
            payload: m.payload,
        })
    }
}

// ── Conversations ───────────────────────────────────────────────────

impl TryFrom<RawConversation> for Conversation {
    type Error = ConvertError;

    fn try_from(c: RawConversation) -> Result<Self, Self::Error> {
        let key = channel_key(c.channel_id.as_deref(), c.channel_type)?;

        // The newest recent message drives the preview. Recents that fail
        // conversion just leave the preview empty.
        let latest = c
            .recents
            .into_iter()
            .max_by_key(|m| (m.timestamp, m.message_seq))
            .and_then(|m| Message::try_from(m).ok());

        let (summary, kind) = latest
            .as_ref()
            .map_or((String::new(), PayloadKind::Text), |m| (m.summary(), m.kind));

        Ok(Self {
            channel_key: key,
            last_message_summary: summary,
            last_timestamp_secs: c.timestamp,
            unread_count: c.unread,
            payload_kind: kind,
            priority: c.priority,
            tags: tag_ids(c.tags),
        })
    }
}

impl From<ChannelInfo> for ChannelMetadata {
    fn from(info: ChannelInfo) -> Self {
        Self {
            channel_key: ChannelKey::new(info.channel_id, info.channel_type),
            name: info.name,
            avatar: info.avatar,
            online: info.online,
            tags: tag_ids(info.tags),
        }
    }
}

// ── Custom events ───────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct EndData {
    #[serde(default)]
    reason_code: u8,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VisitorData {
    #[serde(default)]
    visitor_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    channel_type: Option<u8>,
}

/// Decode the end-of-stream payload.
///
/// Empty data is a normal end. JSON data carries an explicit reason code;
/// any other text is an error message.
fn parse_end_data(data: Option<&str>) -> (u8, Option<String>) {
    let Some(data) = data.map(str::trim).filter(|s| !s.is_empty()) else {
        return (0, None);
    };
    match serde_json::from_str::<EndData>(data) {
        Ok(end) => (end.reason_code, end.message.filter(|m| !m.is_empty())),
        Err(_) => (END_REASON_ERROR, Some(data.to_owned())),
    }
}

fn presence(evt: &RawCustomEvent, online: bool) -> Presence {
    let data: VisitorData = evt
        .data
        .as_deref()
        .and_then(|d| serde_json::from_str(d).ok())
        .unwrap_or_default();
    let channel = optional_key(data.channel_id.as_deref(), data.channel_type)
        .or_else(|| optional_key(evt.channel_id.as_deref(), evt.channel_type));
    Presence {
        channel,
        visitor_id: data.visitor_id,
        online,
    }
}

/// Normalize a custom event into an envelope.
///
/// Returns `None` for event types the core does not understand and for
/// stream events without a correlation id.
pub fn normalize_custom_event(evt: RawCustomEvent) -> Option<InboundEnvelope> {
    let channel = optional_key(evt.channel_id.as_deref(), evt.channel_type);
    let stream_id = || evt.client_msg_no.clone().filter(|s| !s.is_empty());

    match evt.event_type.as_str() {
        // The start marker opens the stream with an empty chunk.
        EVENT_STREAM_START => Some(InboundEnvelope::StreamDelta(StreamDelta {
            client_msg_no: stream_id()?,
            channel,
            chunk: String::new(),
            timestamp: (evt.timestamp > 0).then_some(evt.timestamp),
        })),
        EVENT_STREAM_CONTENT => Some(InboundEnvelope::StreamDelta(StreamDelta {
            client_msg_no: stream_id()?,
            channel,
            chunk: evt.data.clone().unwrap_or_default(),
            timestamp: (evt.timestamp > 0).then_some(evt.timestamp),
        })),
        EVENT_STREAM_END => {
            let (reason_code, error_message) = parse_end_data(evt.data.as_deref());
            Some(InboundEnvelope::StreamEnd(StreamEnd {
                client_msg_no: stream_id()?,
                channel,
                reason_code,
                error_message,
            }))
        }
        EVENT_VISITOR_ONLINE => Some(InboundEnvelope::Presence(presence(&evt, true))),
        EVENT_VISITOR_OFFLINE => Some(InboundEnvelope::Presence(presence(&evt, false))),
        EVENT_PROFILE_UPDATED => {
            let data = evt
                .data
                .as_deref()
                .and_then(|d| serde_json::from_str::<serde_json::Value>(d).ok())
                .unwrap_or(serde_json::Value::Null);
            let visitor_id = data
                .get("visitor_id")
                .and_then(serde_json::Value::as_str)
                .map(String::from);
            Some(InboundEnvelope::ProfileUpdated(ProfileUpdate {
                channel,
                visitor_id,
                data,
            }))
        }
        other => {
            debug!(event_type = other, "ignoring unrecognized custom event");
            None
        }
    }
}
