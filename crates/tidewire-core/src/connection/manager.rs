// ── Connection manager ──
//
// Owns the one realtime session: coalesced connects, the close-code
// driven reconnect policy, and the send path. Every state change is
// published on a watch channel and dispatched as a `ConnectionStatus`
// envelope.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tidewire_api::{BackendEvent, ConnectResult, Link, OutboundFrame, Session, Transport};

use super::ConnectionState;
use super::policy::{CLOSE_ABNORMAL, CloseClass, classify_close};
use crate::config::ConnectionConfig;
use crate::convert::normalize_custom_event;
use crate::dispatch::EventDispatcher;
use crate::error::CoreError;
use crate::model::{
    ChannelKey, ClientFault, ConnectionStatus, FaultKind, InboundEnvelope, Message,
};

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

type SharedAttempt = Shared<BoxFuture<'static, Result<(), CoreError>>>;

/// A message the backend acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub client_msg_no: String,
    pub message_id: Option<String>,
    pub message_seq: u64,
}

struct ActiveSession {
    link: Arc<dyn Link>,
    /// Cancels this session's event pump.
    pump: CancellationToken,
    generation: u64,
}

struct InFlight {
    id: u64,
    attempt: SharedAttempt,
}

// ── ConnectionManager ───────────────────────────────────────────────

/// Cheaply cloneable via `Arc<Inner>`.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    state: watch::Sender<ConnectionState>,
    config: Mutex<Option<ConnectionConfig>>,
    session: Mutex<Option<ActiveSession>>,
    in_flight: Mutex<Option<InFlight>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Source of attempt ids and session generations.
    next_id: AtomicU64,
    /// Bumped by every user disconnect so a connect racing it is discarded.
    epoch: AtomicU64,
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, dispatcher: EventDispatcher) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                dispatcher,
                state,
                config: Mutex::new(None),
                session: Mutex::new(None),
                in_flight: Mutex::new(None),
                reconnect: Mutex::new(None),
                next_id: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The configuration of the current or most recent connection.
    pub async fn config(&self) -> Option<ConnectionConfig> {
        self.inner.config.lock().await.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect with `config`.
    ///
    /// Concurrent callers share one attempt and all observe its outcome.
    /// Already connected with an identical configuration is a no-op; a
    /// different configuration replaces the session.
    pub async fn init(&self, config: ConnectionConfig) -> Result<(), CoreError> {
        let attempt = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(current) = in_flight.as_ref() {
                debug!("connect already in flight, joining it");
                current.attempt.clone()
            } else if self.inner.is_live_with(&config).await {
                debug!("already connected with this configuration");
                return Ok(());
            } else {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let inner = Arc::clone(&self.inner);
                let attempt = async move { inner.run_attempt(id, config).await }
                    .boxed()
                    .shared();
                *in_flight = Some(InFlight {
                    id,
                    attempt: attempt.clone(),
                });
                attempt
            }
        };
        attempt.await
    }

    /// Close the session with a goodbye handshake and cancel any pending
    /// reconnect.
    pub async fn disconnect(&self) {
        self.inner.retire_attempt().await;
        self.inner.cancel_reconnect().await;
        if self.inner.release_session(true).await {
            info!("disconnected");
        }
        self.inner
            .set_state(ConnectionState::Disconnected, Some("disconnected by user".into()));
    }

    /// Tear down without touching the wire. Safe to call in any state,
    /// including when the transport is already gone.
    pub async fn safe_disconnect(&self) {
        self.inner.retire_attempt().await;
        self.inner.cancel_reconnect().await;
        if self.inner.release_session(false).await {
            debug!("session released without close handshake");
        }
        self.inner
            .set_state(ConnectionState::Disconnected, Some("safe disconnect".into()));
    }

    /// Drop the current session and connect again with the last
    /// configuration.
    pub async fn force_reconnect(&self) -> Result<(), CoreError> {
        let config = self.config().await.ok_or(CoreError::NotConfigured)?;
        info!("forcing reconnect");
        self.safe_disconnect().await;
        self.init(config).await
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Send `payload` to `channel` with a fresh client message number.
    pub async fn send(
        &self,
        channel: &ChannelKey,
        payload: serde_json::Value,
    ) -> Result<SendReceipt, CoreError> {
        let client_msg_no = Uuid::new_v4().simple().to_string();
        self.send_with_id(channel, client_msg_no, payload).await
    }

    /// Send with a caller-chosen client message number.
    pub async fn send_with_id(
        &self,
        channel: &ChannelKey,
        client_msg_no: String,
        payload: serde_json::Value,
    ) -> Result<SendReceipt, CoreError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(CoreError::NotConnected { state });
        }
        let link = self.inner.live_link().await?;
        let timeout = self
            .inner
            .config
            .lock()
            .await
            .as_ref()
            .map_or(DEFAULT_SEND_TIMEOUT, |c| c.send_timeout);

        debug!(channel = %channel, client_msg_no, "sending message");
        let frame = OutboundFrame {
            client_msg_no,
            channel_id: channel.channel_id().to_owned(),
            channel_type: channel.channel_type(),
            payload,
        };
        match tokio::time::timeout(timeout, link.send(frame)).await {
            Ok(Ok(ack)) => Ok(SendReceipt {
                client_msg_no: ack.client_msg_no,
                message_id: ack.message_id,
                message_seq: ack.message_seq,
            }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CoreError::SendTimeout {
                timeout_secs: timeout.as_secs(),
            }),
        }
    }

    /// Verify that a `Connected` state is backed by a live handle,
    /// correcting the state if it is not.
    pub async fn check_consistency(&self) -> Result<(), CoreError> {
        if self.state() == ConnectionState::Connected {
            self.inner.live_link().await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn drop_handle_for_test(&self) {
        if let Some(session) = self.inner.session.lock().await.take() {
            session.pump.cancel();
        }
    }
}

// ── Internals ───────────────────────────────────────────────────────

impl Inner {
    async fn is_live_with(&self, config: &ConnectionConfig) -> bool {
        if *self.state.borrow() != ConnectionState::Connected {
            return false;
        }
        if self.config.lock().await.as_ref() != Some(config) {
            return false;
        }
        self.session.lock().await.is_some()
    }

    /// Invalidate the in-flight attempt, if any. Callers already awaiting
    /// it see it fail; the next `init` starts a fresh one.
    async fn retire_attempt(&self) {
        let mut in_flight = self.in_flight.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(stale) = in_flight.take() {
            debug!(attempt = stale.id, "retired in-flight connect attempt");
        }
    }

    async fn run_attempt(
        self: Arc<Self>,
        id: u64,
        config: ConnectionConfig,
    ) -> Result<(), CoreError> {
        let result = self.connect(config).await;
        let mut in_flight = self.in_flight.lock().await;
        if in_flight.as_ref().is_some_and(|f| f.id == id) {
            *in_flight = None;
        }
        result
    }

    async fn connect(self: &Arc<Self>, config: ConnectionConfig) -> Result<(), CoreError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.cancel_reconnect().await;
        self.release_session(false).await;
        *self.config.lock().await = Some(config.clone());

        self.set_state(ConnectionState::Connecting, None);
        info!(url = %config.server_url, identity = %config.identity, "connecting");

        let session = match tokio::time::timeout(config.connect_timeout, self.open(&config)).await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return Err(self.fail_connect(epoch, e)),
            Err(_) => {
                return Err(self.fail_connect(epoch, CoreError::ConnectTimeout {
                    timeout_secs: config.connect_timeout.as_secs(),
                }));
            }
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            session.link.abort();
            debug!("disconnect requested while connecting, discarding session");
            return Err(CoreError::ConnectionFailed {
                url: config.server_url.to_string(),
                reason: "disconnected while connecting".into(),
            });
        }

        self.install(session).await;
        self.set_state(ConnectionState::Connected, None);
        info!("connected");
        Ok(())
    }

    /// Open the transport and wait for the handshake verdict.
    async fn open(&self, config: &ConnectionConfig) -> Result<Session, CoreError> {
        let mut session = self.transport.open(&config.connect_request()).await?;
        loop {
            match session.events.recv().await {
                Some(BackendEvent::Connect {
                    result: ConnectResult::Accepted,
                }) => return Ok(session),
                Some(BackendEvent::Connect {
                    result: ConnectResult::Rejected { code, reason },
                }) => {
                    session.link.abort();
                    return Err(CoreError::AuthenticationFailed {
                        message: format!("connect rejected (code {code}): {reason}"),
                    });
                }
                Some(BackendEvent::Disconnect { code, reason }) => {
                    session.link.abort();
                    let reason = format!("closed during handshake (code {code}): {reason}");
                    return Err(if classify_close(code) == CloseClass::Fatal {
                        CoreError::AuthenticationFailed { message: reason }
                    } else {
                        CoreError::ConnectionFailed {
                            url: config.server_url.to_string(),
                            reason,
                        }
                    });
                }
                Some(_) => debug!("event before handshake completed, dropping"),
                None => {
                    return Err(CoreError::ConnectionFailed {
                        url: config.server_url.to_string(),
                        reason: "transport closed during handshake".into(),
                    });
                }
            }
        }
    }

    fn fail_connect(&self, epoch: u64, err: CoreError) -> CoreError {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(error = %err, "retired connect attempt failed");
            return err;
        }
        warn!(error = %err, "connect failed");
        self.set_state(ConnectionState::Disconnected, Some(err.to_string()));
        let kind = if err.is_terminal() {
            FaultKind::Auth
        } else {
            FaultKind::Transport
        };
        self.report(kind, err.to_string());
        err
    }

    /// Bind a fresh session, retiring whatever was bound before.
    async fn install(self: &Arc<Self>, session: Session) {
        let Session { link, events } = session;
        let generation = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pump = self.cancel.child_token();

        let previous = self.session.lock().await.replace(ActiveSession {
            link,
            pump: pump.clone(),
            generation,
        });
        if let Some(previous) = previous {
            previous.pump.cancel();
            previous.link.abort();
        }

        tokio::spawn(pump_events(Arc::downgrade(self), events, pump, generation));
    }

    /// Returns `true` if a session was bound.
    async fn release_session(&self, graceful: bool) -> bool {
        let Some(session) = self.session.lock().await.take() else {
            return false;
        };
        session.pump.cancel();
        if graceful {
            session.link.close().await;
        } else {
            session.link.abort();
        }
        true
    }

    async fn live_link(&self) -> Result<Arc<dyn Link>, CoreError> {
        let link = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| Arc::clone(&s.link));
        if let Some(link) = link {
            return Ok(link);
        }

        let corrected = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if corrected {
            warn!("state was Connected without a live handle, corrected to Disconnected");
            self.dispatcher
                .dispatch(&InboundEnvelope::ConnectionStatus(ConnectionStatus {
                    state: ConnectionState::Disconnected,
                    reason: Some("state/handle divergence".into()),
                }));
        }
        Err(CoreError::StateDivergence)
    }

    // ── Inbound ──────────────────────────────────────────────────────

    fn deliver(&self, event: BackendEvent) {
        let envelope = match event {
            BackendEvent::Message(raw) => match Message::try_from(raw) {
                Ok(message) => InboundEnvelope::Message(message),
                Err(e) => {
                    warn!(error = %e, "dropping malformed message");
                    return;
                }
            },
            BackendEvent::CustomEvent(evt) => match normalize_custom_event(evt) {
                Some(envelope) => envelope,
                None => return,
            },
            BackendEvent::Error { message } => InboundEnvelope::Error(ClientFault {
                kind: FaultKind::Backend,
                message,
            }),
            BackendEvent::Connect { .. } => {
                debug!("ignoring repeated connect ack");
                return;
            }
            BackendEvent::Disconnect { .. } => return,
        };
        self.dispatcher.dispatch(&envelope);
    }

    async fn on_closed(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let released = {
            let mut session = self.session.lock().await;
            if session.as_ref().is_some_and(|s| s.generation == generation) {
                session.take()
            } else {
                None
            }
        };
        let Some(released) = released else {
            debug!(generation, code, "close for a retired session, ignoring");
            return;
        };
        released.link.abort();

        match classify_close(code) {
            CloseClass::Normal => {
                info!(code, %reason, "connection closed by peer");
                self.set_state(ConnectionState::Disconnected, Some(reason));
            }
            CloseClass::Fatal => {
                warn!(code, %reason, "connection closed with a terminal code, not reconnecting");
                self.set_state(ConnectionState::Disconnected, Some(reason.clone()));
                self.report(
                    FaultKind::Auth,
                    format!("connection closed (code {code}): {reason}"),
                );
            }
            CloseClass::Retryable => {
                warn!(code, %reason, "connection lost, scheduling reconnect");
                self.set_state(ConnectionState::Reconnecting, Some(reason));
                self.schedule_reconnect().await;
            }
        }
    }

    /// Arm the single delayed reconnect attempt.
    async fn schedule_reconnect(self: &Arc<Self>) {
        let Some(config) = self.config.lock().await.clone() else {
            self.set_state(
                ConnectionState::Disconnected,
                Some("no configuration to reconnect with".into()),
            );
            return;
        };
        let delay = config.reconnect_delay;

        let mut slot = self.reconnect.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("reconnect already scheduled");
            return;
        }

        let weak = Arc::downgrade(self);
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detach this timer so the attempt below does not abort it.
            drop(inner.reconnect.lock().await.take());
            reconnect_once(inner, config).await;
        }));
        debug!(?delay, "reconnect scheduled");
    }

    async fn cancel_reconnect(&self) {
        if let Some(handle) = self.reconnect.lock().await.take() {
            handle.abort();
            debug!("pending reconnect cancelled");
        }
    }

    // ── Publishing ───────────────────────────────────────────────────

    fn set_state(&self, state: ConnectionState, reason: Option<String>) {
        let previous = self.state.send_replace(state);
        if previous == state {
            return;
        }
        debug!(from = %previous, to = %state, "connection state changed");
        self.dispatcher
            .dispatch(&InboundEnvelope::ConnectionStatus(ConnectionStatus {
                state,
                reason,
            }));
    }

    fn report(&self, kind: FaultKind, message: String) {
        self.dispatcher
            .dispatch(&InboundEnvelope::Error(ClientFault { kind, message }));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.reconnect.get_mut().take() {
            handle.abort();
        }
        if let Some(session) = self.session.get_mut().take() {
            session.link.abort();
        }
    }
}

/// The timer's single attempt. Boxed so the timer task's type does not
/// depend on the event pump that arms it.
fn reconnect_once(inner: Arc<Inner>, config: ConnectionConfig) -> BoxFuture<'static, ()> {
    async move {
        let manager = ConnectionManager { inner };
        match manager.init(config).await {
            Ok(()) => info!("reconnected"),
            Err(e) => warn!(error = %e, "reconnect attempt failed, staying disconnected"),
        }
    }
    .boxed()
}

/// Forward one session's events, in order, until it closes or is retired.
async fn pump_events(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<BackendEvent>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            Some(BackendEvent::Disconnect { code, reason }) => {
                inner.on_closed(generation, code, reason).await;
                break;
            }
            Some(event) => inner.deliver(event),
            None => {
                inner
                    .on_closed(generation, CLOSE_ABNORMAL, "event stream ended".into())
                    .await;
                break;
            }
        }
    }
    debug!(generation, "event pump stopped");
}
