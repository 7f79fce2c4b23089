// REST API response and request models.
//
// Field optionality mirrors what the backend actually sends: identity
// fields may be missing on malformed records (the core drops those), and
// `tags` distinguishes "not sent" (`None`) from "sent but empty".

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

use crate::link::RawMessage;

/// Logical conversation list views offered by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConversationTab {
    /// Conversations the current agent participates in.
    My,
    /// Every conversation the agent has served, including closed ones.
    All,
    /// Unassigned visitors waiting in the queue.
    Waiting,
}

impl ConversationTab {
    pub(crate) fn path(self) -> &'static str {
        match self {
            Self::My => "v1/conversations/my",
            Self::All => "v1/conversations/all",
            Self::Waiting => "v1/conversations/waiting",
        }
    }
}

/// Offset pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32,
    /// Number of recent messages to include per conversation.
    pub msg_count: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            msg_count: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub has_next: bool,
}

/// One page of conversations.
///
/// Records are kept as raw JSON and decoded one at a time, so a single
/// malformed record cannot fail the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationPage {
    #[serde(default)]
    pub conversations: Vec<serde_json::Value>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
    /// Channel details returned alongside the `my` tab.
    #[serde(default)]
    pub channels: Vec<serde_json::Value>,
}

impl ConversationPage {
    /// Decode each conversation record independently.
    pub fn records(&self) -> impl Iterator<Item = Result<RawConversation, serde_json::Error>> + '_ {
        self.conversations.iter().map(RawConversation::deserialize)
    }

    /// Decode each channel entry independently.
    pub fn channel_infos(&self) -> impl Iterator<Item = Result<ChannelInfo, serde_json::Error>> + '_ {
        self.channels.iter().map(ChannelInfo::deserialize)
    }
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A conversation record as the REST API returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConversation {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_type: Option<u8>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unread: u32,
    /// Epoch seconds of the latest message.
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_msg_seq: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recents: Vec<RawMessage>,
    #[serde(default)]
    pub tags: Option<Vec<RawTag>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTag {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Channel metadata: display info, presence and tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub channel_type: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<RawTag>>,
}

/// Direction of a channel history pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullMode {
    /// Older messages, walking back from `start_seq`.
    #[default]
    Down,
    /// Newer messages, walking forward from `start_seq`.
    Up,
}

impl PullMode {
    fn wire(self) -> u8 {
        match self {
            Self::Down => 0,
            Self::Up => 1,
        }
    }
}

/// Window of a channel history pull. Zero sequences leave that bound open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    pub start_seq: u64,
    pub end_seq: u64,
    pub limit: u32,
    pub pull_mode: PullMode,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            start_seq: 0,
            end_seq: 0,
            limit: 100,
            pull_mode: PullMode::Down,
        }
    }
}

/// Messages of one channel, as returned by the history endpoint.
///
/// Like [`ConversationPage`], messages are decoded one at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelHistory {
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "flag")]
    pub more: bool,
}

impl ChannelHistory {
    /// Decode each message independently.
    pub fn records(&self) -> impl Iterator<Item = Result<RawMessage, serde_json::Error>> + '_ {
        self.messages.iter().map(RawMessage::deserialize)
    }
}

/// `more` arrives as `0`/`1` from the message store and as a bool elsewhere.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    })
}

#[derive(Debug, Serialize)]
pub(crate) struct ChannelRef<'a> {
    pub channel_id: &'a str,
    pub channel_type: u8,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChannelMessagesRequest<'a> {
    pub channel_id: &'a str,
    pub channel_type: u8,
    pub start_message_seq: u64,
    pub end_message_seq: u64,
    pub limit: u32,
    pub pull_mode: u8,
}

impl<'a> ChannelMessagesRequest<'a> {
    pub(crate) fn new(channel_id: &'a str, channel_type: u8, query: &HistoryQuery) -> Self {
        Self {
            channel_id,
            channel_type,
            start_message_seq: query.start_seq,
            end_message_seq: query.end_seq,
            limit: query.limit,
            pull_mode: query.pull_mode.wire(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CancelRunRequest<'a> {
    pub client_msg_no: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SetUnreadRequest<'a> {
    pub channel_id: &'a str,
    pub channel_type: u8,
    pub unread: u32,
}

#[derive(Debug, Serialize)]
pub(crate) struct SyncMyRequest {
    pub msg_count: u32,
}

/// Error body shape: `{"detail": "..."}` or `{"detail": {"message": "..."}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    pub(crate) fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| self.detail.to_string(), String::from),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn tags_absent_differs_from_empty() {
        let absent: ChannelInfo =
            serde_json::from_str(r#"{"channel_id":"v1","channel_type":251}"#).unwrap();
        let empty: ChannelInfo =
            serde_json::from_str(r#"{"channel_id":"v1","channel_type":251,"tags":[]}"#).unwrap();

        assert!(absent.tags.is_none());
        assert_eq!(empty.tags, Some(Vec::new()));
    }

    #[test]
    fn error_body_message_shapes() {
        let flat: ErrorBody = serde_json::from_str(r#"{"detail":"nope"}"#).unwrap();
        let nested: ErrorBody =
            serde_json::from_str(r#"{"detail":{"message":"AI disabled"}}"#).unwrap();
        assert_eq!(flat.message(), "nope");
        assert_eq!(nested.message(), "AI disabled");
    }

    #[test]
    fn null_scalars_read_as_defaults() {
        let raw: RawConversation = serde_json::from_str(
            r#"{"channel_id":"v1","channel_type":251,"unread":null,"timestamp":null,"recents":null}"#,
        )
        .unwrap();
        assert_eq!(raw.unread, 0);
        assert_eq!(raw.timestamp, 0);
        assert!(raw.recents.is_empty());
    }

    #[test]
    fn one_bad_record_does_not_fail_the_page() {
        let page: ConversationPage = serde_json::from_str(
            r#"{"conversations":[
                {"channel_id":"v1","channel_type":251,"unread":3},
                {"channel_id":"v2","channel_type":4096},
                {"channel_id":"v3","channel_type":251,"unread":"lots"}
            ]}"#,
        )
        .unwrap();

        let decoded: Vec<bool> = page.records().map(|r| r.is_ok()).collect();
        assert_eq!(decoded, vec![true, false, false]);
        assert_eq!(page.records().next().unwrap().unwrap().unread, 3);
    }

    #[test]
    fn history_more_accepts_int_or_bool() {
        let int: ChannelHistory =
            serde_json::from_str(r#"{"messages":[{"message_seq":4}],"more":1}"#).unwrap();
        let boolean: ChannelHistory = serde_json::from_str(r#"{"more":false}"#).unwrap();
        let bare: ChannelHistory = serde_json::from_str(r#"{"messages":null}"#).unwrap();

        assert!(int.more);
        assert_eq!(int.records().count(), 1);
        assert!(!boolean.more);
        assert!(bare.messages.is_empty());
    }

    #[test]
    fn history_request_writes_pull_mode_as_number() {
        let query = HistoryQuery {
            start_seq: 40,
            pull_mode: PullMode::Up,
            ..HistoryQuery::default()
        };
        let body = serde_json::to_value(ChannelMessagesRequest::new("v1", 251, &query)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "channel_id": "v1",
                "channel_type": 251,
                "start_message_seq": 40,
                "end_message_seq": 0,
                "limit": 100,
                "pull_mode": 1
            })
        );
    }

    #[test]
    fn tab_round_trips_through_strum() {
        assert_eq!(ConversationTab::Waiting.to_string(), "waiting");
        assert_eq!("my".parse::<ConversationTab>().unwrap(), ConversationTab::My);
    }
}
