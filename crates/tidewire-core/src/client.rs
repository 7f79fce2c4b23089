// ── Chat client facade ──
//
// One handle for applications. Wires the connection manager, event
// dispatcher, stream reassembler and conversation reconciler together:
// realtime messages and stream deltas keep a per-channel realtime view
// current, and `refresh_tab` merges that view over a REST snapshot.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tidewire_api::{ApiClient, ConversationTab, HistoryQuery, PageRequest, Transport};

use crate::config::{ClientOptions, ConnectionConfig};
use crate::connection::{ConnectionManager, ConnectionState, SendReceipt};
use crate::dispatch::{EventDispatcher, Subscription};
use crate::error::CoreError;
use crate::model::{
    ChannelKey, ChannelMetadata, Conversation, Message, MessageHistory, PayloadKind,
};
use crate::reassembler::StreamReassembler;
use crate::reconcile::{ConversationReconciler, MetadataSource, RetryScheduler, TagFilter};

/// Cheaply cloneable via `Arc<ClientInner>`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    connection: ConnectionManager,
    streams: Arc<StreamReassembler>,
    reconciler: ConversationReconciler,
    api: Option<Arc<ApiClient>>,
    realtime: Arc<DashMap<ChannelKey, Conversation>>,
    /// Our own user id, so our messages do not count as unread.
    identity: Arc<RwLock<Option<String>>>,
    options: ClientOptions,
    wiring: std::sync::Mutex<Vec<Subscription>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Metadata source for clients built without a REST endpoint.
struct NoMetadata;

#[async_trait::async_trait]
impl MetadataSource for NoMetadata {
    async fn channel_metadata(&self, _key: &ChannelKey) -> Result<ChannelMetadata, CoreError> {
        Err(no_api())
    }
}

fn no_api() -> CoreError {
    CoreError::Config {
        message: "no REST API endpoint configured".into(),
    }
}

impl ChatClient {
    /// Realtime-only client. Snapshot, cancel and metadata calls fail
    /// with a configuration error.
    pub fn new(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        Self::from_parts(transport, Arc::new(NoMetadata), None, options)
    }

    /// Client backed by the REST API for snapshots and metadata.
    pub fn with_api(transport: Arc<dyn Transport>, api: ApiClient, options: ClientOptions) -> Self {
        let api = Arc::new(api);
        let metadata: Arc<dyn MetadataSource> = api.clone();
        Self::from_parts(transport, metadata, Some(api), options)
    }

    pub fn from_parts(
        transport: Arc<dyn Transport>,
        metadata: Arc<dyn MetadataSource>,
        api: Option<Arc<ApiClient>>,
        options: ClientOptions,
    ) -> Self {
        let dispatcher = EventDispatcher::new();
        let connection = ConnectionManager::new(transport, dispatcher.clone());
        let streams = Arc::new(StreamReassembler::new(options.stream_ttl));
        let retry = RetryScheduler::new(options.retry.clone(), metadata);
        let reconciler = ConversationReconciler::new(retry.clone());
        let realtime = Arc::new(DashMap::new());
        let identity = Arc::new(RwLock::new(None));

        let wiring = wire(&dispatcher, &streams, &realtime, &identity, &retry);

        Self {
            inner: Arc::new(ClientInner {
                connection,
                streams,
                reconciler,
                api,
                realtime,
                identity,
                options,
                wiring: std::sync::Mutex::new(wiring),
                sweeper: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        self.inner.connection.dispatcher()
    }

    pub fn streams(&self) -> &StreamReassembler {
        &self.inner.streams
    }

    pub fn reconciler(&self) -> &ConversationReconciler {
        &self.inner.reconciler
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub async fn connect(&self, config: ConnectionConfig) -> Result<(), CoreError> {
        self.ensure_sweeper().await;
        if let Ok(mut identity) = self.inner.identity.write() {
            *identity = Some(config.identity.clone());
        }
        self.inner.connection.init(config).await
    }

    pub async fn disconnect(&self) {
        self.inner.connection.disconnect().await;
    }

    pub async fn safe_disconnect(&self) {
        self.inner.connection.safe_disconnect().await;
    }

    pub async fn force_reconnect(&self) -> Result<(), CoreError> {
        self.inner.connection.force_reconnect().await
    }

    /// Stop background work, unregister internal handlers and drop the
    /// session without a close handshake.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.sweeper.lock().await.take() {
            handle.abort();
        }
        self.inner.reconciler.retry().shutdown();
        self.inner.connection.safe_disconnect().await;
        let wiring = self
            .inner
            .wiring
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        for subscription in wiring {
            let _ = subscription.unsubscribe();
        }
        info!("client shut down");
    }

    // ── Messaging ────────────────────────────────────────────────────

    pub async fn send(
        &self,
        channel: &ChannelKey,
        payload: serde_json::Value,
    ) -> Result<SendReceipt, CoreError> {
        self.inner.connection.send(channel, payload).await
    }

    /// Send a plain text message and reflect it in the realtime view.
    pub async fn send_text(&self, channel: &ChannelKey, text: &str) -> Result<SendReceipt, CoreError> {
        let payload = serde_json::json!({ "type": PayloadKind::Text.code(), "content": text });
        let receipt = self.inner.connection.send(channel, payload).await?;

        let own = Conversation {
            last_message_summary: text.trim().to_owned(),
            last_timestamp_secs: chrono::Utc::now().timestamp(),
            ..Conversation::new(channel.clone())
        };
        upsert_realtime(&self.inner.realtime, own);
        Ok(receipt)
    }

    /// Stop an in-progress assistant reply.
    ///
    /// The stream is marked cancelled locally first, so later deltas are
    /// dropped even if the backend request fails.
    pub async fn cancel_reply(&self, client_msg_no: &str, reason: Option<&str>) -> Result<(), CoreError> {
        self.inner.streams.cancel(client_msg_no);
        let api = self.inner.api.as_ref().ok_or_else(no_api)?;
        api.cancel_run(client_msg_no, reason).await?;
        info!(client_msg_no, "reply cancellation accepted");
        Ok(())
    }

    // ── Conversations ────────────────────────────────────────────────

    /// Fetch one page of a tab as domain conversations. Records missing
    /// their channel identity are dropped.
    pub async fn fetch_snapshot(
        &self,
        tab: ConversationTab,
        page: PageRequest,
    ) -> Result<Vec<Conversation>, CoreError> {
        let api = self.inner.api.as_ref().ok_or_else(no_api)?;
        self.ensure_sweeper().await;
        let response = api.sync_conversations(tab, page).await?;

        for (index, info) in response.channel_infos().enumerate() {
            match info {
                Ok(info) => self.inner.reconciler.retry().record(info.into()),
                Err(e) => warn!(%tab, index, error = %e, "skipping malformed channel entry"),
            }
        }

        let total = response.conversations.len();
        let conversations: Vec<Conversation> = response
            .records()
            .enumerate()
            .filter_map(|(index, raw)| {
                let converted = raw
                    .map_err(|e| e.to_string())
                    .and_then(|raw| Conversation::try_from(raw).map_err(|e| e.to_string()));
                match converted {
                    Ok(c) => Some(c),
                    Err(error) => {
                        warn!(%tab, index, error, "dropping malformed snapshot record");
                        None
                    }
                }
            })
            .collect();
        debug!(%tab, total, kept = conversations.len(), "snapshot fetched");
        Ok(conversations)
    }

    /// Snapshot of the realtime view.
    pub fn realtime_conversations(&self) -> Vec<Conversation> {
        self.inner
            .realtime
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Merge `snapshot` with the realtime view.
    pub fn merge_with(&self, snapshot: &[Conversation], filter: Option<&TagFilter>) -> Vec<Conversation> {
        let realtime = self.realtime_conversations();
        self.inner.reconciler.merge(snapshot, &realtime, filter)
    }

    /// Fetch a tab and merge it with everything seen in realtime.
    pub async fn refresh_tab(
        &self,
        tab: ConversationTab,
        page: PageRequest,
        filter: Option<&TagFilter>,
    ) -> Result<Vec<Conversation>, CoreError> {
        let snapshot = self.fetch_snapshot(tab, page).await?;
        Ok(self.merge_with(&snapshot, filter))
    }

    /// Clear the unread counter locally and on the backend.
    pub async fn mark_read(&self, channel: &ChannelKey) -> Result<(), CoreError> {
        if let Some(mut conv) = self.inner.realtime.get_mut(channel) {
            conv.unread_count = 0;
        }
        let api = self.inner.api.as_ref().ok_or_else(no_api)?;
        api.set_unread(channel.channel_id(), channel.channel_type(), 0)
            .await?;
        Ok(())
    }

    /// Delete a conversation on the backend, then drop it from the realtime
    /// view. A later message on the channel brings it back.
    pub async fn delete_conversation(&self, channel: &ChannelKey) -> Result<(), CoreError> {
        let api = self.inner.api.as_ref().ok_or_else(no_api)?;
        api.delete_conversation(channel.channel_id(), channel.channel_type())
            .await?;
        self.inner.realtime.remove(channel);
        info!(%channel, "conversation deleted");
        Ok(())
    }

    /// Pull a window of message history for one channel. Messages that fail
    /// to decode are dropped; ones without a channel are attributed to
    /// `channel`.
    pub async fn channel_history(
        &self,
        channel: &ChannelKey,
        query: HistoryQuery,
    ) -> Result<MessageHistory, CoreError> {
        let api = self.inner.api.as_ref().ok_or_else(no_api)?;
        let response = api
            .sync_channel_messages(channel.channel_id(), channel.channel_type(), &query)
            .await?;

        let mut messages: Vec<Message> = response
            .records()
            .enumerate()
            .filter_map(|(index, raw)| {
                let converted = raw.map_err(|e| e.to_string()).and_then(|mut raw| {
                    if raw.channel_id.is_none() {
                        raw.channel_id = Some(channel.channel_id().to_owned());
                        raw.channel_type = Some(channel.channel_type());
                    }
                    Message::try_from(raw).map_err(|e| e.to_string())
                });
                match converted {
                    Ok(m) => Some(m),
                    Err(error) => {
                        warn!(%channel, index, error, "dropping malformed history message");
                        None
                    }
                }
            })
            .collect();
        messages.sort_by_key(|m| m.message_seq);
        debug!(%channel, kept = messages.len(), more = response.more, "history fetched");
        Ok(MessageHistory {
            messages,
            more: response.more,
        })
    }

    // ── Background ───────────────────────────────────────────────────

    async fn ensure_sweeper(&self) {
        let mut slot = self.inner.sweeper.lock().await;
        if slot.is_some() {
            return;
        }
        let streams = Arc::clone(&self.inner.streams);
        let retry = self.inner.reconciler.retry().clone();
        let cancel = self.inner.cancel.child_token();
        let every = self.inner.options.sweep_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        streams.sweep();
                        retry.sweep();
                    }
                }
            }
            debug!("sweeper stopped");
        }));
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Internal wiring ─────────────────────────────────────────────────

fn wire(
    dispatcher: &EventDispatcher,
    streams: &Arc<StreamReassembler>,
    realtime: &Arc<DashMap<ChannelKey, Conversation>>,
    identity: &Arc<RwLock<Option<String>>>,
    retry: &RetryScheduler,
) -> Vec<Subscription> {
    let mut subs = Vec::with_capacity(4);

    {
        let streams = Arc::clone(streams);
        let realtime = Arc::clone(realtime);
        let identity = Arc::clone(identity);
        subs.push(dispatcher.on_message(move |message| {
            streams.observe_message(message);
            let own = identity
                .read()
                .ok()
                .and_then(|id| id.clone())
                .is_some_and(|id| message.from_uid.as_deref() == Some(id.as_str()));
            record_message(&realtime, message, own);
        }));
    }

    {
        let streams = Arc::clone(streams);
        let realtime = Arc::clone(realtime);
        subs.push(dispatcher.on_stream_delta(move |delta| {
            if !streams.handle_delta(delta) {
                return;
            }
            let (Some(channel), Some(state)) =
                (delta.channel.as_ref(), streams.get_state(&delta.client_msg_no))
            else {
                return;
            };
            let mut conv = realtime
                .get(channel)
                .map(|c| c.value().clone())
                .unwrap_or_else(|| Conversation::new(channel.clone()));
            conv.last_message_summary = state.content.trim().to_owned();
            conv.payload_kind = PayloadKind::Streaming;
            if let Some(ts) = delta.timestamp {
                conv.last_timestamp_secs = conv.last_timestamp_secs.max(ts);
            }
            realtime.insert(channel.clone(), conv);
        }));
    }

    {
        let streams = Arc::clone(streams);
        subs.push(dispatcher.on_stream_end(move |end| {
            streams.handle_end(end);
        }));
    }

    {
        let retry = retry.clone();
        subs.push(dispatcher.on_profile_updated(move |update| {
            if let Some(channel) = &update.channel {
                debug!(channel = %channel, "profile updated, refreshing metadata");
                retry.invalidate(channel);
                retry.ensure(channel);
            }
        }));
    }

    subs
}

fn record_message(realtime: &DashMap<ChannelKey, Conversation>, message: &Message, own: bool) {
    let previous_unread = realtime
        .get(&message.channel)
        .map_or(0, |c| c.unread_count);
    let unread = if own {
        previous_unread
    } else {
        previous_unread.saturating_add(1)
    };
    upsert_realtime(realtime, Conversation::from_message(message, unread));
}

/// Insert `conv` unless the stored entry is fresher. Known tags survive.
fn upsert_realtime(realtime: &DashMap<ChannelKey, Conversation>, mut conv: Conversation) {
    let mut entry = realtime
        .entry(conv.channel_key.clone())
        .or_insert_with(|| conv.clone());
    if conv.supersedes(&entry) {
        if conv.tags.is_none() {
            conv.tags = entry.tags.take();
        }
        *entry = conv;
    }
}
