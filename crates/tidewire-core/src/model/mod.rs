// ── Domain model ──
//
// Canonical types the rest of the core and its consumers depend on.
// Raw wire shapes live in `tidewire_api`; `crate::convert` maps them here.

pub mod channel;
pub mod conversation;
pub mod event;
pub mod message;
pub mod metadata;

// ── Re-exports ──────────────────────────────────────────────────────

pub use channel::{
    CHANNEL_TYPE_CUSTOMER_SERVICE, CHANNEL_TYPE_GROUP, CHANNEL_TYPE_PERSON, ChannelKey,
    ChannelKeyError,
};
pub use conversation::Conversation;
pub use event::{
    ClientFault, ConnectionStatus, EventKind, FaultKind, InboundEnvelope, Presence, ProfileUpdate,
    StreamDelta, StreamEnd,
};
pub use message::{Message, MessageHistory, PayloadKind};
pub use metadata::ChannelMetadata;
