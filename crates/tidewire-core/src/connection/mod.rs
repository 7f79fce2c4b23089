// ── Realtime connection ──

pub mod manager;
pub mod policy;

use serde::Serialize;
use strum::Display;

pub use manager::{ConnectionManager, SendReceipt};
pub use policy::{CloseClass, classify_close};

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the delay before the single automatic reconnect.
    Reconnecting,
}
