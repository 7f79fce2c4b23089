// ── Runtime connection configuration ──
//
// These types describe how to reach the realtime backend and how the
// client tunes itself. They carry credentials and timeouts but never
// touch disk: the CLI builds them from `tidewire-config` and hands them in.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use tidewire_api::ConnectRequest;

use crate::reconcile::RetryConfig;

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Realtime endpoint (e.g. `wss://im.example.com/ws`).
    pub server_url: Url,
    /// User id presented in the connect handshake.
    pub identity: String,
    /// Token presented in the connect handshake.
    pub credential: SecretString,
    /// Upper bound on socket open plus handshake.
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a send acknowledgement.
    pub send_timeout: Duration,
    /// Delay before the single automatic reconnect attempt.
    pub reconnect_delay: Duration,
}

impl ConnectionConfig {
    pub fn new(server_url: Url, identity: impl Into<String>, credential: SecretString) -> Self {
        Self {
            server_url,
            identity: identity.into(),
            credential,
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(3),
        }
    }

    pub(crate) fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            url: self.server_url.clone(),
            uid: self.identity.clone(),
            token: self.credential.clone(),
        }
    }
}

// Compares the credential too, so a rotated token forces a new session.
impl PartialEq for ConnectionConfig {
    fn eq(&self, other: &Self) -> bool {
        self.server_url == other.server_url
            && self.identity == other.identity
            && self.credential.expose_secret() == other.credential.expose_secret()
            && self.connect_timeout == other.connect_timeout
            && self.send_timeout == other.send_timeout
            && self.reconnect_delay == other.reconnect_delay
    }
}

impl Eq for ConnectionConfig {}

/// Client-side tuning that is independent of any one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Streams untouched for this long are dropped.
    pub stream_ttl: Duration,
    /// How often idle streams and channel metadata are swept.
    pub sweep_interval: Duration,
    /// Metadata retry policy for tag-filtered views.
    pub retry: RetryConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            stream_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(token: &str) -> ConnectionConfig {
        ConnectionConfig::new(
            "wss://im.example.com/ws".parse().unwrap(),
            "staff-1",
            SecretString::from(token.to_owned()),
        )
    }

    #[test]
    fn defaults() {
        let c = config("t");
        assert_eq!(c.connect_timeout, Duration::from_secs(10));
        assert_eq!(c.reconnect_delay, Duration::from_secs(3));
        assert_eq!(ClientOptions::default().retry.max_concurrent, 6);
    }

    #[test]
    fn rotated_credential_is_a_different_config() {
        assert_eq!(config("a"), config("a"));
        assert_ne!(config("a"), config("b"));
    }
}
