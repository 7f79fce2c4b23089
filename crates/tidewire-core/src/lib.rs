// tidewire-core: Realtime conversation layer between tidewire-api and consumers (CLI).

pub mod client;
pub mod config;
pub mod connection;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod reassembler;
pub mod reconcile;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::ChatClient;
pub use config::{ClientOptions, ConnectionConfig};
pub use connection::{CloseClass, ConnectionManager, ConnectionState, SendReceipt, classify_close};
pub use dispatch::{EventDispatcher, Subscription};
pub use error::CoreError;
pub use reassembler::{EndReason, StreamReassembler, StreamState, StreamUpdate};
pub use reconcile::{
    ConversationReconciler, MergeObserver, MetadataSource, MetadataUpdate, RecordSource,
    RetryConfig, RetryScheduler, RetryState, TagFilter, calculate_backoff,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ChannelKey, ChannelKeyError, ChannelMetadata, ClientFault, ConnectionStatus, Conversation,
    EventKind, FaultKind, InboundEnvelope, Message, MessageHistory, PayloadKind, Presence,
    ProfileUpdate, StreamDelta, StreamEnd,
};

// Transport-level types consumers need to build a client.
pub use tidewire_api::{
    ApiClient, ConversationTab, HistoryQuery, HttpConfig, PageRequest, PullMode, TlsMode,
    Transport, WebSocketTransport,
};
