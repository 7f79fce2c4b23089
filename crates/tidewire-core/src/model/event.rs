// ── Inbound events ──
//
// Everything the connection layer hands to subscribers is an
// `InboundEnvelope`. Each variant maps to exactly one `EventKind`, which
// is the key the dispatcher files handlers under.

use serde::Serialize;
use strum::{Display, EnumIter};

use super::channel::ChannelKey;
use super::message::Message;
use crate::connection::ConnectionState;

/// Subscription key for the event dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Message,
    ConnectionStatus,
    Error,
    StreamDelta,
    StreamEnd,
    Presence,
    ProfileUpdated,
}

/// A normalized inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEnvelope {
    Message(Message),
    ConnectionStatus(ConnectionStatus),
    Error(ClientFault),
    StreamDelta(StreamDelta),
    StreamEnd(StreamEnd),
    Presence(Presence),
    ProfileUpdated(ProfileUpdate),
}

impl InboundEnvelope {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::ConnectionStatus(_) => EventKind::ConnectionStatus,
            Self::Error(_) => EventKind::Error,
            Self::StreamDelta(_) => EventKind::StreamDelta,
            Self::StreamEnd(_) => EventKind::StreamEnd,
            Self::Presence(_) => EventKind::Presence,
            Self::ProfileUpdated(_) => EventKind::ProfileUpdated,
        }
    }
}

// ── Payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    /// Socket-level failure or unexpected close.
    Transport,
    /// Credentials or protocol rejected; reconnecting will not help.
    Auth,
    /// The backend reported an error frame.
    Backend,
}

/// Error surfaced to subscribers of [`EventKind::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFault {
    pub kind: FaultKind,
    pub message: String,
}

/// One chunk of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDelta {
    pub client_msg_no: String,
    pub channel: Option<ChannelKey>,
    pub chunk: String,
    /// Epoch seconds, when the backend stamped the event.
    pub timestamp: Option<i64>,
}

/// Terminal event of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnd {
    pub client_msg_no: String,
    pub channel: Option<ChannelKey>,
    /// 0 is a normal end; anything else is a failure class.
    pub reason_code: u8,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub channel: Option<ChannelKey>,
    pub visitor_id: Option<String>,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub channel: Option<ChannelKey>,
    pub visitor_id: Option<String>,
    pub data: serde_json::Value,
}
