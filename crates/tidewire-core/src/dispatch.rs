// ── Event dispatcher ──
//
// Per-kind handler registries with explicit unsubscribe tokens. Handlers
// run synchronously in registration order on the dispatching task; a
// panicking handler is logged and skipped so the rest of the fan-out
// still runs.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{error, trace};

use crate::model::{
    ClientFault, ConnectionStatus, EventKind, InboundEnvelope, Message, Presence, ProfileUpdate,
    StreamDelta, StreamEnd,
};

type Handler = Arc<dyn Fn(&InboundEnvelope) + Send + Sync>;

struct Registration {
    id: u64,
    handler: Handler,
}

struct Registry {
    handlers: DashMap<EventKind, Vec<Registration>>,
    next_id: AtomicU64,
}

/// Fan-out of inbound envelopes to subscribers, keyed by [`EventKind`].
///
/// Cheaply cloneable; clones share the same registries.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
}

/// Token returned by [`EventDispatcher::subscribe`].
///
/// Dropping the token leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    kind: EventKind,
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the handler. Returns `false` if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let Some(mut list) = registry.handlers.get_mut(&self.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.id != self.id);
        before != list.len()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("kinds", &self.registry.handlers.len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                handlers: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for every envelope of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&InboundEnvelope) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .entry(kind)
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        trace!(%kind, id, "subscribed");
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `envelope` to every handler of its kind.
    ///
    /// Returns how many handlers ran to completion.
    pub fn dispatch(&self, envelope: &InboundEnvelope) -> usize {
        let kind = envelope.kind();

        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<(u64, Handler)> = match self.registry.handlers.get(&kind) {
            Some(list) => list
                .iter()
                .map(|r| (r.id, Arc::clone(&r.handler)))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "<non-string panic>".into());
                    error!(%kind, subscription = id, %reason, "event handler panicked");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry.handlers.get(&kind).map_or(0, |l| l.len())
    }

    /// Drop every registration of every kind.
    pub fn clear(&self) {
        self.registry.handlers.clear();
    }

    // ── Typed helpers ────────────────────────────────────────────────

    pub fn on_message<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Message, move |env| {
            if let InboundEnvelope::Message(m) = env {
                f(m);
            }
        })
    }

    pub fn on_connection_status<F>(&self, f: F) -> Subscription
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ConnectionStatus, move |env| {
            if let InboundEnvelope::ConnectionStatus(s) = env {
                f(s);
            }
        })
    }

    pub fn on_error<F>(&self, f: F) -> Subscription
    where
        F: Fn(&ClientFault) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Error, move |env| {
            if let InboundEnvelope::Error(e) = env {
                f(e);
            }
        })
    }

    pub fn on_stream_delta<F>(&self, f: F) -> Subscription
    where
        F: Fn(&StreamDelta) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::StreamDelta, move |env| {
            if let InboundEnvelope::StreamDelta(d) = env {
                f(d);
            }
        })
    }

    pub fn on_stream_end<F>(&self, f: F) -> Subscription
    where
        F: Fn(&StreamEnd) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::StreamEnd, move |env| {
            if let InboundEnvelope::StreamEnd(e) = env {
                f(e);
            }
        })
    }

    pub fn on_presence<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Presence) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Presence, move |env| {
            if let InboundEnvelope::Presence(p) = env {
                f(p);
            }
        })
    }

    pub fn on_profile_updated<F>(&self, f: F) -> Subscription
    where
        F: Fn(&ProfileUpdate) + Send + Sync + 'static,
    {
        self.subscribe(EventKind::ProfileUpdated, move |env| {
            if let InboundEnvelope::ProfileUpdated(p) = env {
                f(p);
            }
        })
    }
}
