// In-memory transport for tests: scripted handshakes, recorded sends,
// and a handle to push backend events into the live session.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;

use tidewire_api::{
    Ack, BackendEvent, ConnectRequest, ConnectResult, Error, Link, OutboundFrame, RawMessage,
    Session, Transport,
};

use crate::config::ConnectionConfig;

/// What the next `open` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    Accept,
    Reject,
    /// Socket opens but the handshake never completes.
    Hang,
    /// Socket never opens.
    Fail,
}

#[derive(Default)]
pub(crate) struct FakeLink {
    pub sent: Mutex<Vec<OutboundFrame>>,
    pub closed: AtomicBool,
    pub aborted: AtomicBool,
    seq: AtomicU64,
}

#[async_trait]
impl Link for FakeLink {
    async fn send(&self, frame: OutboundFrame) -> Result<Ack, Error> {
        if self.closed.load(Ordering::SeqCst) || self.aborted.load(Ordering::SeqCst) {
            return Err(Error::LinkClosed);
        }
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let ack = Ack {
            client_msg_no: frame.client_msg_no.clone(),
            message_id: Some(format!("m-{seq}")),
            message_seq: seq,
        };
        self.sent.lock().unwrap().push(frame);
        Ok(ack)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    pub opens: AtomicUsize,
    pub open_delay: Duration,
    script: Mutex<VecDeque<Script>>,
    senders: Mutex<Vec<mpsc::UnboundedSender<BackendEvent>>>,
    links: Mutex<Vec<Arc<FakeLink>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(open_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            open_delay,
            ..Self::default()
        })
    }

    /// Queue behaviors for upcoming opens; unscripted opens accept.
    pub fn script(&self, steps: impl IntoIterator<Item = Script>) {
        self.script.lock().unwrap().extend(steps);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn link(&self, n: usize) -> Arc<FakeLink> {
        Arc::clone(&self.links.lock().unwrap()[n])
    }

    /// Push an event into the most recently opened session.
    pub fn emit(&self, event: BackendEvent) {
        let senders = self.senders.lock().unwrap();
        let _ = senders.last().unwrap().send(event);
    }

    pub fn close_with(&self, code: u16) {
        self.emit(BackendEvent::Disconnect {
            code,
            reason: format!("closed with {code}"),
        });
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _request: &ConnectRequest) -> Result<Session, Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Accept);

        if step == Script::Fail {
            return Err(Error::WebSocketConnect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match step {
            Script::Accept => tx
                .send(BackendEvent::Connect {
                    result: ConnectResult::Accepted,
                })
                .unwrap(),
            Script::Reject => tx
                .send(BackendEvent::Connect {
                    result: ConnectResult::Rejected {
                        code: 401,
                        reason: "bad token".into(),
                    },
                })
                .unwrap(),
            Script::Hang | Script::Fail => {}
        }

        let link = Arc::new(FakeLink::default());
        self.links.lock().unwrap().push(Arc::clone(&link));
        self.senders.lock().unwrap().push(tx);
        Ok(Session { link, events: rx })
    }
}

pub(crate) fn config() -> ConnectionConfig {
    ConnectionConfig::new(
        "wss://im.example.com/ws".parse().unwrap(),
        "staff-1",
        SecretString::from("token".to_owned()),
    )
}

pub(crate) fn raw_message(channel_id: &str, seq: u64, content: &str) -> RawMessage {
    RawMessage {
        message_id: Some(format!("m{seq}")),
        message_seq: seq,
        channel_id: Some(channel_id.into()),
        channel_type: Some(251),
        from_uid: Some("visitor".into()),
        timestamp: 1_700_000_000 + i64::try_from(seq).unwrap(),
        payload: serde_json::json!({ "type": 1, "content": content }),
        ..RawMessage::default()
    }
}
