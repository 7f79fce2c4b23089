// ── Channel metadata ──

use serde::{Deserialize, Serialize};

use super::channel::ChannelKey;

/// Display and classification data for a channel, fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub channel_key: ChannelKey,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub online: Option<bool>,
    /// `None` when the backend answered without a tag list.
    pub tags: Option<Vec<String>>,
}
