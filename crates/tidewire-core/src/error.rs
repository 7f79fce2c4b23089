// ── Core error types ──
//
// User-facing errors from tidewire-core. Consumers never see raw
// WebSocket frames or HTTP bodies; the `From<tidewire_api::Error>` impl
// translates wire-layer errors into domain variants.
//
// `CoreError` is `Clone` because a single coalesced connect attempt hands
// the same outcome to every caller awaiting it.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Connect attempt timed out after {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    #[error("Connection was never configured; call init() first")]
    NotConfigured,

    #[error("Not connected (state: {state})")]
    NotConnected { state: ConnectionState },

    #[error("Connection state reported Connected without a live transport handle")]
    StateDivergence,

    // ── Send errors ──────────────────────────────────────────────────
    #[error("Send failed: {message}")]
    SendFailed { message: String },

    #[error("Send was not acknowledged within {timeout_secs}s")]
    SendTimeout { timeout_secs: u64 },

    // ── Collaborator API errors ──────────────────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    /// The API answered 2xx but the body did not have the expected shape.
    #[error("Unexpected API response: {message}")]
    UnexpectedResponse { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Credential or protocol failures that a retry will not fix.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. } | Self::Config { .. })
    }
}

// ── Conversion from wire-layer errors ───────────────────────────────

impl From<tidewire_api::Error> for CoreError {
    fn from(err: tidewire_api::Error) -> Self {
        match err {
            tidewire_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            tidewire_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Api {
                        message: format!("request timed out: {e}"),
                        status: None,
                    }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "<unknown>".into()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            tidewire_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            tidewire_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            tidewire_api::Error::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            tidewire_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            tidewire_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            tidewire_api::Error::LinkClosed => CoreError::SendFailed {
                message: "link closed before the send was acknowledged".into(),
            },
            tidewire_api::Error::SendRejected { reason_code } => CoreError::SendFailed {
                message: format!("backend rejected the message (reason code {reason_code})"),
            },
            tidewire_api::Error::Deserialization { message, body: _ } => {
                CoreError::UnexpectedResponse { message }
            }
        }
    }
}
