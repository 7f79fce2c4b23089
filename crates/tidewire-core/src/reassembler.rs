// ── Stream reassembly ──
//
// Streamed assistant replies arrive as ordered deltas correlated by
// `client_msg_no`, followed by one end event. The reassembler keeps the
// accumulated text per stream, honors local cancellation, and forgets
// streams that nobody consumes within the TTL.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use strum::Display;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::model::{ChannelKey, Message, StreamDelta, StreamEnd};

const UPDATE_CHANNEL_SIZE: usize = 256;

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
pub enum EndReason {
    /// Completed normally.
    #[default]
    None,
    Timeout,
    Error,
    Cancelled,
    Forced,
}

impl EndReason {
    /// Map a wire reason code. Unknown non-zero codes are treated as errors.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::None,
            1 => Self::Timeout,
            3 => Self::Cancelled,
            4 => Self::Forced,
            _ => Self::Error,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Self::Timeout | Self::Error | Self::Forced)
    }
}

/// Accumulated state of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StreamState {
    pub content: String,
    pub ended: bool,
    pub end_reason: EndReason,
    pub error_message: Option<String>,
    pub channel: Option<ChannelKey>,
}

/// Change notification for stream observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Delta {
        client_msg_no: String,
        content_len: usize,
    },
    Ended {
        client_msg_no: String,
        reason: EndReason,
    },
}

struct Entry {
    state: StreamState,
    cancelled: bool,
    touched: Instant,
}

impl Entry {
    fn new(channel: Option<ChannelKey>) -> Self {
        Self {
            state: StreamState {
                channel,
                ..StreamState::default()
            },
            cancelled: false,
            touched: Instant::now(),
        }
    }
}

/// Per-`client_msg_no` reassembly of streamed replies.
pub struct StreamReassembler {
    streams: DashMap<String, Entry>,
    ttl: Duration,
    updates: broadcast::Sender<StreamUpdate>,
}

impl StreamReassembler {
    pub fn new(ttl: Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self {
            streams: DashMap::new(),
            ttl,
            updates,
        }
    }

    /// Append a chunk. Returns `false` when the delta was discarded
    /// because the stream already ended or was cancelled locally.
    pub fn on_delta(&self, client_msg_no: &str, chunk: &str) -> bool {
        self.apply_delta(client_msg_no, None, chunk)
    }

    /// Finish a stream. Only the first end for a stream takes effect.
    pub fn on_end(&self, client_msg_no: &str, reason_code: u8, error_message: Option<&str>) -> bool {
        self.apply_end(client_msg_no, None, reason_code, error_message)
    }

    pub fn handle_delta(&self, delta: &StreamDelta) -> bool {
        self.apply_delta(&delta.client_msg_no, delta.channel.as_ref(), &delta.chunk)
    }

    pub fn handle_end(&self, end: &StreamEnd) -> bool {
        self.apply_end(
            &end.client_msg_no,
            end.channel.as_ref(),
            end.reason_code,
            end.error_message.as_deref(),
        )
    }

    /// Register the placeholder message that announces a stream.
    pub fn observe_message(&self, message: &Message) {
        let Some(no) = message.client_msg_no.as_deref() else {
            return;
        };
        if !message.is_streaming() {
            return;
        }
        self.streams
            .entry(no.to_owned())
            .or_insert_with(|| Entry::new(Some(message.channel.clone())));
    }

    /// Mark a stream as cancelled by the local user. Later deltas are
    /// dropped and a normal end is recorded as [`EndReason::Cancelled`].
    pub fn cancel(&self, client_msg_no: &str) {
        let mut entry = self
            .streams
            .entry(client_msg_no.to_owned())
            .or_insert_with(|| Entry::new(None));
        entry.cancelled = true;
        entry.touched = Instant::now();
        debug!(client_msg_no, "stream cancelled locally");
    }

    pub fn get_state(&self, client_msg_no: &str) -> Option<StreamState> {
        self.streams.get(client_msg_no).map(|e| e.state.clone())
    }

    /// Consume an ended stream, freeing its buffer.
    ///
    /// Streams still in progress are left in place and `None` is returned.
    pub fn take(&self, client_msg_no: &str) -> Option<StreamState> {
        self.streams
            .remove_if(client_msg_no, |_, e| e.state.ended)
            .map(|(_, e)| e.state)
    }

    /// Drop streams untouched for longer than the TTL. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.streams.len();
        self.streams
            .retain(|_, e| now.duration_since(e.touched) < self.ttl);
        let removed = before.saturating_sub(self.streams.len());
        if removed > 0 {
            debug!(removed, "swept idle streams");
        }
        removed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamUpdate> {
        self.updates.subscribe()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn apply_delta(&self, no: &str, channel: Option<&ChannelKey>, chunk: &str) -> bool {
        let content_len = {
            let mut entry = self
                .streams
                .entry(no.to_owned())
                .or_insert_with(|| Entry::new(channel.cloned()));
            if entry.state.ended || entry.cancelled {
                trace!(client_msg_no = no, "discarding delta for finished stream");
                return false;
            }
            if entry.state.channel.is_none() {
                entry.state.channel = channel.cloned();
            }
            entry.state.content.push_str(chunk);
            entry.touched = Instant::now();
            entry.state.content.len()
        };

        let _ = self.updates.send(StreamUpdate::Delta {
            client_msg_no: no.to_owned(),
            content_len,
        });
        true
    }

    fn apply_end(
        &self,
        no: &str,
        channel: Option<&ChannelKey>,
        reason_code: u8,
        error_message: Option<&str>,
    ) -> bool {
        let reason = {
            let mut entry = self
                .streams
                .entry(no.to_owned())
                .or_insert_with(|| Entry::new(channel.cloned()));
            if entry.state.ended {
                trace!(client_msg_no = no, "ignoring repeated end");
                return false;
            }
            let reason = if entry.cancelled && reason_code == 0 {
                EndReason::Cancelled
            } else {
                EndReason::from_code(reason_code)
            };
            entry.state.ended = true;
            entry.state.end_reason = reason;
            entry.state.error_message = error_message.map(String::from);
            entry.touched = Instant::now();
            reason
        };

        debug!(client_msg_no = no, %reason, "stream ended");
        let _ = self.updates.send(StreamUpdate::Ended {
            client_msg_no: no.to_owned(),
            reason,
        });
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn reassembler() -> StreamReassembler {
        StreamReassembler::new(Duration::from_secs(300))
    }

    #[test]
    fn deltas_concatenate_in_order() {
        let r = reassembler();
        assert!(r.on_delta("c-1", "Hel"));
        assert!(r.on_delta("c-1", "lo"));
        assert!(r.on_end("c-1", 0, None));

        let state = r.get_state("c-1").unwrap();
        assert_eq!(state.content, "Hello");
        assert!(state.ended);
        assert_eq!(state.end_reason, EndReason::None);
    }

    #[test]
    fn reason_code_two_is_error() {
        let r = reassembler();
        r.on_delta("c-1", "partial");
        r.on_end("c-1", 2, Some("model crashed"));

        let state = r.get_state("c-1").unwrap();
        assert_eq!(state.end_reason, EndReason::Error);
        assert!(state.end_reason.is_error());
        assert_eq!(state.error_message.as_deref(), Some("model crashed"));
        assert_eq!(state.content, "partial");
    }

    #[test]
    fn reason_code_table() {
        assert_eq!(EndReason::from_code(0), EndReason::None);
        assert_eq!(EndReason::from_code(1), EndReason::Timeout);
        assert_eq!(EndReason::from_code(2), EndReason::Error);
        assert_eq!(EndReason::from_code(3), EndReason::Cancelled);
        assert_eq!(EndReason::from_code(4), EndReason::Forced);
        assert_eq!(EndReason::from_code(77), EndReason::Error);
    }

    #[test]
    fn end_is_idempotent() {
        let r = reassembler();
        r.on_delta("c-1", "x");
        assert!(r.on_end("c-1", 0, None));
        assert!(!r.on_end("c-1", 2, Some("late")));

        let state = r.get_state("c-1").unwrap();
        assert_eq!(state.end_reason, EndReason::None);
        assert!(state.error_message.is_none());
    }

    #[test]
    fn deltas_after_end_are_discarded() {
        let r = reassembler();
        r.on_delta("c-1", "done");
        r.on_end("c-1", 0, None);
        assert!(!r.on_delta("c-1", " more"));
        assert_eq!(r.get_state("c-1").unwrap().content, "done");
    }

    #[test]
    fn local_cancel_drops_deltas_and_marks_end_cancelled() {
        let r = reassembler();
        r.on_delta("c-1", "Hel");
        r.cancel("c-1");
        assert!(!r.on_delta("c-1", "lo"));
        r.on_end("c-1", 0, None);

        let state = r.get_state("c-1").unwrap();
        assert_eq!(state.content, "Hel");
        assert_eq!(state.end_reason, EndReason::Cancelled);
    }

    #[test]
    fn end_without_deltas_creates_empty_stream() {
        let r = reassembler();
        r.on_end("c-9", 0, None);
        let state = r.get_state("c-9").unwrap();
        assert!(state.ended);
        assert!(state.content.is_empty());
    }

    #[test]
    fn take_only_consumes_ended_streams() {
        let r = reassembler();
        r.on_delta("c-1", "x");
        assert!(r.take("c-1").is_none());
        r.on_end("c-1", 0, None);
        assert_eq!(r.take("c-1").unwrap().content, "x");
        assert!(r.get_state("c-1").is_none());
    }

    #[test]
    fn updates_are_broadcast() {
        let r = reassembler();
        let mut rx = r.subscribe();
        r.on_delta("c-1", "ab");
        r.on_end("c-1", 0, None);

        assert_eq!(
            rx.try_recv().unwrap(),
            StreamUpdate::Delta {
                client_msg_no: "c-1".into(),
                content_len: 2
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamUpdate::Ended {
                client_msg_no: "c-1".into(),
                reason: EndReason::None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_idle_streams_after_ttl() {
        let r = StreamReassembler::new(Duration::from_secs(60));
        r.on_delta("stale", "x");
        tokio::time::advance(Duration::from_secs(45)).await;
        r.on_delta("fresh", "y");
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(r.sweep(), 1);
        assert!(r.get_state("stale").is_none());
        assert!(r.get_state("fresh").is_some());
    }
}
