// ── Conversation reconciliation ──
//
// Merges an authoritative REST snapshot with conversations observed in
// realtime since the snapshot was taken. The snapshot decides which
// conversations exist; realtime records only refresh the fields that
// change with each message, or add conversations the snapshot has not
// caught up with yet. Realtime-only additions honor the view's tag
// filter, fetching metadata through the retry scheduler when tags are
// unknown.

pub mod filter;
pub mod retry;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use strum::Display;
use tracing::{debug, trace, warn};

use tidewire_api::ApiClient;

use crate::error::CoreError;
use crate::model::{ChannelKey, ChannelMetadata, Conversation};

pub use filter::TagFilter;
pub use retry::{MetadataUpdate, RetryConfig, RetryScheduler, RetryState, calculate_backoff};

// ── Seams ───────────────────────────────────────────────────────────

/// Supplies channel metadata on demand.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn channel_metadata(&self, key: &ChannelKey) -> Result<ChannelMetadata, CoreError>;
}

#[async_trait]
impl MetadataSource for ApiClient {
    async fn channel_metadata(&self, key: &ChannelKey) -> Result<ChannelMetadata, CoreError> {
        let info = self
            .channel_info(key.channel_id(), key.channel_type())
            .await?;
        Ok(info.into())
    }
}

/// Where a dropped record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RecordSource {
    Snapshot,
    Realtime,
}

/// Notified of records the merge had to drop.
pub trait MergeObserver: Send + Sync {
    fn record_dropped(&self, source: RecordSource, record: &Conversation, reason: &str);
}

/// Default observer: logs each drop at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl MergeObserver for LogObserver {
    fn record_dropped(&self, source: RecordSource, record: &Conversation, reason: &str) {
        warn!(
            %source,
            channel_type = record.channel_key.channel_type(),
            reason,
            "dropping malformed conversation record"
        );
    }
}

// ── Reconciler ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Visible,
    Hidden,
    /// Tags unknown; hidden until metadata arrives or the bypass is set.
    AwaitingMetadata,
}

/// Cheaply cloneable; clones share the retry scheduler.
#[derive(Clone)]
pub struct ConversationReconciler {
    retry: RetryScheduler,
    observer: Arc<dyn MergeObserver>,
}

impl ConversationReconciler {
    pub fn new(retry: RetryScheduler) -> Self {
        Self {
            retry,
            observer: Arc::new(LogObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn MergeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn retry(&self) -> &RetryScheduler {
        &self.retry
    }

    /// Merge `snapshot` with `realtime` and return the list sorted by
    /// last activity, newest first.
    ///
    /// Pure with respect to its inputs apart from scheduling metadata
    /// fetches for filtered realtime additions with unknown tags.
    pub fn merge(
        &self,
        snapshot: &[Conversation],
        realtime: &[Conversation],
        filter: Option<&TagFilter>,
    ) -> Vec<Conversation> {
        let mut merged: Vec<Conversation> = Vec::with_capacity(snapshot.len());
        let mut index: HashMap<ChannelKey, usize> = HashMap::with_capacity(snapshot.len());

        for record in snapshot {
            if !record.channel_key.is_valid() {
                self.observer
                    .record_dropped(RecordSource::Snapshot, record, "missing channel id");
                continue;
            }
            if let Some(tags) = &record.tags {
                self.retry.record(ChannelMetadata {
                    channel_key: record.channel_key.clone(),
                    name: None,
                    avatar: None,
                    online: None,
                    tags: Some(tags.clone()),
                });
            }
            match index.entry(record.channel_key.clone()) {
                Entry::Occupied(_) => {
                    debug!(channel = %record.channel_key, "duplicate snapshot record, keeping first");
                }
                Entry::Vacant(slot) => {
                    slot.insert(merged.len());
                    merged.push(record.clone());
                }
            }
        }

        // Realtime-only conversations, folded to the freshest observation.
        let mut additions: Vec<Conversation> = Vec::new();
        let mut addition_index: HashMap<ChannelKey, usize> = HashMap::new();

        for record in realtime {
            if !record.channel_key.is_valid() {
                self.observer
                    .record_dropped(RecordSource::Realtime, record, "missing channel id");
                continue;
            }
            if let Some(&i) = index.get(&record.channel_key) {
                let base = &mut merged[i];
                if record.supersedes(base) {
                    apply_realtime(base, record);
                }
                continue;
            }
            match addition_index.entry(record.channel_key.clone()) {
                Entry::Occupied(slot) => {
                    let current = &mut additions[*slot.get()];
                    if record.supersedes(current) {
                        *current = record.clone();
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(additions.len());
                    additions.push(record.clone());
                }
            }
        }

        let mut awaiting = Vec::new();
        for candidate in additions {
            if !candidate.has_visible_content() {
                trace!(channel = %candidate.channel_key, "skipping empty realtime record");
                continue;
            }
            match self.visibility(&candidate, filter) {
                Visibility::Visible => {
                    let mut candidate = candidate;
                    if candidate.tags.is_none() {
                        candidate.tags = self.retry.resolved_tags(&candidate.channel_key);
                    }
                    merged.push(candidate);
                }
                Visibility::Hidden => {}
                Visibility::AwaitingMetadata => awaiting.push(candidate.channel_key),
            }
        }
        self.schedule(&awaiting);

        // Stable: ties keep snapshot order, then realtime arrival order.
        merged.sort_by(|a, b| b.last_timestamp_secs.cmp(&a.last_timestamp_secs));
        merged
    }

    fn visibility(&self, conversation: &Conversation, filter: Option<&TagFilter>) -> Visibility {
        let Some(filter) = filter.filter(|f| !f.is_empty()) else {
            return Visibility::Visible;
        };
        let key = &conversation.channel_key;

        let tags = conversation
            .tags
            .clone()
            .or_else(|| self.retry.resolved_tags(key));
        match tags {
            Some(tags) if filter.matches(&tags) => Visibility::Visible,
            Some(_) => Visibility::Hidden,
            None if self.retry.is_bypassed(key) => Visibility::Visible,
            None => Visibility::AwaitingMetadata,
        }
    }

    /// Start metadata fetches, at most `max_concurrent` new ones per pass.
    fn schedule(&self, keys: &[ChannelKey]) {
        let cap = self.retry.config().max_concurrent;
        let mut started = 0;
        for key in keys {
            if started >= cap {
                debug!(
                    deferred = keys.len() - started,
                    "metadata fetch cap reached for this pass"
                );
                break;
            }
            if self.retry.ensure(key) {
                started += 1;
            }
        }
    }
}

/// Copy the per-message fields of a newer realtime observation.
fn apply_realtime(base: &mut Conversation, realtime: &Conversation) {
    base.last_message_summary.clone_from(&realtime.last_message_summary);
    base.payload_kind = realtime.payload_kind;
    base.last_timestamp_secs = realtime.last_timestamp_secs;
    base.unread_count = realtime.unread_count;
    base.priority = realtime.priority;
}
