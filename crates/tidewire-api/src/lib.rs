// tidewire-api: Wire-facing layer (realtime WebSocket transport + REST collaborator client)

pub mod error;
pub mod http;
pub mod link;
pub mod models;
pub mod rest;
pub mod websocket;

pub use error::Error;
pub use http::{HttpConfig, TlsMode};
pub use link::{
    Ack, BackendEvent, ConnectRequest, ConnectResult, Link, OutboundFrame, RawCustomEvent,
    RawMessage, Session, Transport,
};
pub use models::{
    ChannelHistory, ChannelInfo, ConversationPage, ConversationTab, HistoryQuery, PageRequest,
    PullMode, RawConversation, RawTag,
};
pub use rest::ApiClient;
pub use websocket::WebSocketTransport;
