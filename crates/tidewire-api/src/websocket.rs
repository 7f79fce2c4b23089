//! WebSocket implementation of the realtime [`Transport`].
//!
//! Opens one socket per [`Session`], performs the JSON connect handshake,
//! and translates text frames into [`BackendEvent`]s delivered in the order
//! the backend produced them. Reconnection is NOT handled here: the core's
//! connection manager owns the policy and simply opens a new session.
//!
//! # Example
//!
//! ```rust,ignore
//! use tidewire_api::{ConnectRequest, Transport, WebSocketTransport};
//!
//! let transport = WebSocketTransport::default();
//! let mut session = transport.open(&request).await?;
//!
//! while let Some(event) = session.events.recv().await {
//!     println!("{event:?}");
//! }
//!
//! session.link.close().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::link::{
    Ack, BackendEvent, ConnectRequest, ConnectResult, Link, OutboundFrame, RawCustomEvent,
    RawMessage, Session, Transport,
};

/// How long a graceful close waits for the peer's close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Close code reported when the socket drops without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported for a close frame without a payload.
const NO_STATUS_RECEIVED: u16 = 1005;

// ── Wire frames ──────────────────────────────────────────────────────

/// Frames the backend sends. Every text frame is `{"type": "...", ...}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Connack {
        #[serde(default)]
        reason_code: u16,
        #[serde(default)]
        reason: Option<String>,
    },
    Recv(RawMessage),
    Event(RawCustomEvent),
    Sendack {
        client_seq: u64,
        #[serde(default)]
        message_id: Option<serde_json::Value>,
        #[serde(default)]
        message_seq: u64,
        #[serde(default)]
        reason_code: u8,
    },
    Error {
        message: String,
    },
    Ping,
    Disconnect {
        code: u16,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Frames the client sends.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Connect {
        uid: &'a str,
        token: &'a str,
    },
    Send {
        client_seq: u64,
        #[serde(flatten)]
        frame: &'a OutboundFrame,
    },
    Pong,
}

enum WriterCmd {
    Text(String),
    Close,
}

struct PendingSend {
    client_msg_no: String,
    tx: oneshot::Sender<Result<Ack, Error>>,
}

type PendingMap = DashMap<u64, PendingSend>;

// ── WebSocketTransport ───────────────────────────────────────────────

/// Opens WebSocket sessions against the realtime backend.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: &ConnectRequest) -> Result<Session, Error> {
        tracing::info!(url = %request.url, uid = %request.uid, "Connecting to WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request.url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        tracing::debug!("WebSocket upgraded, sending connect handshake");

        let (write, read) = ws_stream.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let reader_done = CancellationToken::new();
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());

        tokio::spawn(write_loop(write, writer_rx, cancel.clone()));
        tokio::spawn(read_loop(
            read,
            event_tx,
            writer_tx.clone(),
            Arc::clone(&pending),
            cancel.clone(),
            reader_done.clone(),
        ));

        let link = WsLink {
            writer_tx,
            pending,
            next_seq: AtomicU64::new(1),
            cancel,
            reader_done,
        };

        link.enqueue(&ClientFrame::Connect {
            uid: &request.uid,
            token: request.token.expose_secret(),
        })?;

        Ok(Session {
            link: Arc::new(link),
            events: event_rx,
        })
    }
}

// ── WsLink ───────────────────────────────────────────────────────────

struct WsLink {
    writer_tx: mpsc::UnboundedSender<WriterCmd>,
    pending: Arc<PendingMap>,
    next_seq: AtomicU64,
    cancel: CancellationToken,
    reader_done: CancellationToken,
}

impl WsLink {
    fn enqueue(&self, frame: &ClientFrame<'_>) -> Result<(), Error> {
        let text = serde_json::to_string(frame).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })?;
        self.writer_tx
            .send(WriterCmd::Text(text))
            .map_err(|_| Error::LinkClosed)
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        // The reader holds a writer handle for pongs, so neither task
        // exits on its own once the link is gone.
        self.cancel.cancel();
    }
}

/// Removes a pending entry if the sender gives up before the ack arrives.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    seq: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.seq);
    }
}

#[async_trait]
impl Link for WsLink {
    async fn send(&self, frame: OutboundFrame) -> Result<Ack, Error> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingSend {
                client_msg_no: frame.client_msg_no.clone(),
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            seq,
        };

        self.enqueue(&ClientFrame::Send {
            client_seq: seq,
            frame: &frame,
        })?;

        rx.await.map_err(|_| Error::LinkClosed)?
    }

    async fn close(&self) {
        if self.writer_tx.send(WriterCmd::Close).is_ok() {
            let _ = tokio::time::timeout(CLOSE_GRACE, self.reader_done.cancelled()).await;
        }
        self.cancel.cancel();
    }

    fn abort(&self) {
        self.cancel.cancel();
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<WriterCmd>,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(WriterCmd::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "WebSocket write failed");
                        break;
                    }
                }
                Some(WriterCmd::Close) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "goodbye".into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "WebSocket close handshake failed");
                    }
                    break;
                }
                None => break,
            }
        }
    }

    tracing::trace!("WebSocket writer exiting");
}

async fn read_loop<S>(
    mut stream: S,
    event_tx: mpsc::UnboundedSender<BackendEvent>,
    writer_tx: mpsc::UnboundedSender<WriterCmd>,
    pending: Arc<PendingMap>,
    cancel: CancellationToken,
    done: CancellationToken,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let disconnect = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_text(text.as_str(), &event_tx, &writer_tx, &pending);
                }
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite answers protocol-level pings itself
                    tracing::trace!("WebSocket ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (NO_STATUS_RECEIVED, String::new()),
                        |cf| (u16::from(cf.code), cf.reason.as_str().to_owned()),
                    );
                    tracing::info!(code, reason = %reason, "WebSocket close frame received");
                    break Some((code, reason));
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    break Some((ABNORMAL_CLOSURE, e.to_string()));
                }
                None => {
                    tracing::info!("WebSocket stream ended");
                    break Some((ABNORMAL_CLOSURE, "stream ended".to_owned()));
                }
                Some(Ok(_)) => {
                    // Binary, Pong, Frame -- ignore
                }
            }
        }
    };

    // Fail any sends still waiting for an ack.
    pending.clear();

    if let Some((code, reason)) = disconnect {
        let _ = event_tx.send(BackendEvent::Disconnect { code, reason });
    }
    done.cancel();
}

// ── Frame handling ───────────────────────────────────────────────────

/// Parse one text frame and forward whatever it carries.
fn handle_text(
    text: &str,
    event_tx: &mpsc::UnboundedSender<BackendEvent>,
    writer_tx: &mpsc::UnboundedSender<WriterCmd>,
    pending: &PendingMap,
) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse WebSocket frame");
            return;
        }
    };

    let event = match frame {
        ServerFrame::Connack {
            reason_code,
            reason,
        } => {
            let result = if reason_code == 0 {
                ConnectResult::Accepted
            } else {
                ConnectResult::Rejected {
                    code: reason_code,
                    reason: reason.unwrap_or_default(),
                }
            };
            BackendEvent::Connect { result }
        }
        ServerFrame::Recv(message) => BackendEvent::Message(message),
        ServerFrame::Event(event) => BackendEvent::CustomEvent(event),
        ServerFrame::Error { message } => BackendEvent::Error { message },
        ServerFrame::Disconnect { code, reason } => BackendEvent::Disconnect {
            code,
            reason: reason.unwrap_or_default(),
        },
        ServerFrame::Sendack {
            client_seq,
            message_id,
            message_seq,
            reason_code,
        } => {
            complete_send(pending, client_seq, message_id, message_seq, reason_code);
            return;
        }
        ServerFrame::Ping => {
            if let Ok(pong) = serde_json::to_string(&ClientFrame::Pong) {
                let _ = writer_tx.send(WriterCmd::Text(pong));
            }
            return;
        }
    };

    // Ignore send errors -- the session owner has gone away
    let _ = event_tx.send(event);
}

fn complete_send(
    pending: &PendingMap,
    client_seq: u64,
    message_id: Option<serde_json::Value>,
    message_seq: u64,
    reason_code: u8,
) {
    let Some((_, entry)) = pending.remove(&client_seq) else {
        tracing::debug!(client_seq, "sendack for unknown sequence");
        return;
    };

    let result = if reason_code == 0 {
        Ok(Ack {
            client_msg_no: entry.client_msg_no,
            message_id: message_id.map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            message_seq,
        })
    } else {
        Err(Error::SendRejected { reason_code })
    };
    let _ = entry.tx.send(result);
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn channels() -> (
        mpsc::UnboundedSender<BackendEvent>,
        mpsc::UnboundedReceiver<BackendEvent>,
        mpsc::UnboundedSender<WriterCmd>,
        mpsc::UnboundedReceiver<WriterCmd>,
    ) {
        let (etx, erx) = mpsc::unbounded_channel();
        let (wtx, wrx) = mpsc::unbounded_channel();
        (etx, erx, wtx, wrx)
    }

    #[test]
    fn connack_accepted() {
        let (etx, mut erx, wtx, _wrx) = channels();
        handle_text(r#"{"type":"connack","reason_code":0}"#, &etx, &wtx, &DashMap::new());

        match erx.try_recv().unwrap() {
            BackendEvent::Connect { result } => assert_eq!(result, ConnectResult::Accepted),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn connack_rejected_carries_reason() {
        let (etx, mut erx, wtx, _wrx) = channels();
        handle_text(
            r#"{"type":"connack","reason_code":4001,"reason":"token expired"}"#,
            &etx,
            &wtx,
            &DashMap::new(),
        );

        match erx.try_recv().unwrap() {
            BackendEvent::Connect {
                result: ConnectResult::Rejected { code, reason },
            } => {
                assert_eq!(code, 4001);
                assert_eq!(reason, "token expired");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn recv_frame_becomes_message() {
        let (etx, mut erx, wtx, _wrx) = channels();
        let raw = serde_json::json!({
            "type": "recv",
            "message_id": "m-1",
            "message_seq": 12,
            "client_msg_no": "c-1",
            "channel_id": "visitor-1",
            "channel_type": 251,
            "timestamp": 1_700_000_000,
            "payload": { "type": 1, "content": "hello" }
        });
        handle_text(&raw.to_string(), &etx, &wtx, &DashMap::new());

        match erx.try_recv().unwrap() {
            BackendEvent::Message(msg) => {
                assert_eq!(msg.channel_id.as_deref(), Some("visitor-1"));
                assert_eq!(msg.message_seq, 12);
                assert_eq!(msg.payload["content"], "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn event_frame_becomes_custom_event() {
        let (etx, mut erx, wtx, _wrx) = channels();
        let raw = serde_json::json!({
            "type": "event",
            "id": 99,
            "event_type": "___TextMessageContent",
            "data": "Hel",
            "client_msg_no": "c-1-ai"
        });
        handle_text(&raw.to_string(), &etx, &wtx, &DashMap::new());

        match erx.try_recv().unwrap() {
            BackendEvent::CustomEvent(evt) => {
                assert_eq!(evt.id.as_deref(), Some("99"));
                assert_eq!(evt.event_type, "___TextMessageContent");
                assert_eq!(evt.data.as_deref(), Some("Hel"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (etx, mut erx, wtx, mut wrx) = channels();
        handle_text(r#"{"type":"ping"}"#, &etx, &wtx, &DashMap::new());

        assert!(erx.try_recv().is_err());
        match wrx.try_recv().unwrap() {
            WriterCmd::Text(text) => assert_eq!(text, r#"{"type":"pong"}"#),
            WriterCmd::Close => panic!("expected pong"),
        }
    }

    #[tokio::test]
    async fn sendack_completes_pending_send() {
        let (etx, _erx, wtx, _wrx) = channels();
        let pending = DashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(
            5,
            PendingSend {
                client_msg_no: "c-5".into(),
                tx,
            },
        );

        handle_text(
            r#"{"type":"sendack","client_seq":5,"message_id":123,"message_seq":40,"reason_code":0}"#,
            &etx,
            &wtx,
            &pending,
        );

        let ack = rx.await.unwrap().unwrap();
        assert_eq!(ack.client_msg_no, "c-5");
        assert_eq!(ack.message_id.as_deref(), Some("123"));
        assert_eq!(ack.message_seq, 40);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn sendack_with_failure_code_rejects() {
        let (etx, _erx, wtx, _wrx) = channels();
        let pending = DashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(
            1,
            PendingSend {
                client_msg_no: "c-1".into(),
                tx,
            },
        );

        handle_text(
            r#"{"type":"sendack","client_seq":1,"reason_code":3}"#,
            &etx,
            &wtx,
            &pending,
        );

        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SendRejected { reason_code: 3 }));
    }

    #[test]
    fn malformed_frame_is_skipped() {
        let (etx, mut erx, wtx, mut wrx) = channels();
        handle_text("not json at all", &etx, &wtx, &DashMap::new());
        handle_text(r#"{"type":"mystery"}"#, &etx, &wtx, &DashMap::new());

        assert!(erx.try_recv().is_err());
        assert!(wrx.try_recv().is_err());
    }

    #[test]
    fn send_frame_flattens_outbound_fields() {
        let frame = OutboundFrame {
            client_msg_no: "c-9".into(),
            channel_id: "visitor-1".into(),
            channel_type: 251,
            payload: serde_json::json!({ "type": 1, "content": "hi" }),
        };
        let text = serde_json::to_value(ClientFrame::Send {
            client_seq: 9,
            frame: &frame,
        })
        .unwrap();

        assert_eq!(text["type"], "send");
        assert_eq!(text["client_seq"], 9);
        assert_eq!(text["channel_type"], 251);
        assert_eq!(text["payload"]["content"], "hi");
    }
}
