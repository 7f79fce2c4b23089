//! Transport seam between the realtime backend and the core.
//!
//! A [`Transport`] opens a [`Session`]: an outbound [`Link`] plus an ordered
//! receiver of [`BackendEvent`]s. The WebSocket implementation lives in
//! [`crate::websocket`]; tests substitute their own.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::error::Error;

// ── Connect request ─────────────────────────────────────────────────

/// Everything a transport needs to open one connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: Url,
    pub uid: String,
    pub token: SecretString,
}

// ── Backend events ──────────────────────────────────────────────────

/// Outcome of the backend's connect handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResult {
    Accepted,
    Rejected { code: u16, reason: String },
}

/// Raw event produced by a transport, in the order the backend sent it.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Connect { result: ConnectResult },
    Disconnect { code: u16, reason: String },
    Message(RawMessage),
    Error { message: String },
    CustomEvent(RawCustomEvent),
}

/// A chat message as delivered by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "string_or_number")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message_seq: u64,
    #[serde(default)]
    pub client_msg_no: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_type: Option<u8>,
    #[serde(default)]
    pub from_uid: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// An out-of-band custom event (stream deltas, presence, profile updates).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCustomEvent {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub channel_type: Option<u8>,
    #[serde(default)]
    pub client_msg_no: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
}

// ── Outbound ────────────────────────────────────────────────────────

/// A user-authored message addressed to one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub client_msg_no: String,
    pub channel_id: String,
    pub channel_type: u8,
    pub payload: serde_json::Value,
}

/// Backend acknowledgement of an [`OutboundFrame`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub client_msg_no: String,
    pub message_id: Option<String>,
    pub message_seq: u64,
}

// ── Traits ──────────────────────────────────────────────────────────

/// An open connection: outbound link plus the inbound event stream.
pub struct Session {
    pub link: Arc<dyn Link>,
    pub events: mpsc::UnboundedReceiver<BackendEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Opens sessions against the realtime backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the underlying connection and send the connect handshake.
    ///
    /// Returns as soon as the socket is up; the handshake outcome arrives
    /// as [`BackendEvent::Connect`] on the session's event receiver.
    async fn open(&self, request: &ConnectRequest) -> Result<Session, Error>;
}

/// Outbound half of a session.
#[async_trait]
pub trait Link: Send + Sync {
    /// Send a frame and wait for the backend acknowledgement.
    async fn send(&self, frame: OutboundFrame) -> Result<Ack, Error>;

    /// Close gracefully with a goodbye handshake.
    async fn close(&self);

    /// Drop the connection immediately without a close handshake.
    fn abort(&self);
}

// ── Serde helpers ───────────────────────────────────────────────────

/// Accept identifiers the backend sends either as strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn message_id_accepts_numbers() {
        let msg: RawMessage = serde_json::from_str(
            r#"{"message_id": 7731, "channel_id": "v1", "channel_type": 251, "timestamp": 100}"#,
        )
        .unwrap();
        assert_eq!(msg.message_id.as_deref(), Some("7731"));
        assert_eq!(msg.channel_type, Some(251));
        assert!(msg.payload.is_null());
    }

    #[test]
    fn custom_event_tolerates_missing_fields() {
        let evt: RawCustomEvent =
            serde_json::from_str(r#"{"event_type": "visitor.online"}"#).unwrap();
        assert_eq!(evt.event_type, "visitor.online");
        assert!(evt.data.is_none());
        assert!(evt.client_msg_no.is_none());
    }
}
