// ── Metadata retry scheduler ──
//
// Fetches channel metadata for conversations whose tags are unknown.
// One fetch per channel at a time, a global cap on concurrent fetches,
// exponential backoff between attempts, and a bypass flag once the
// attempts run out so the conversation is not hidden forever. Settled
// state for channels nobody asks about is swept after an idle period.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::MetadataSource;
use crate::model::{ChannelKey, ChannelMetadata};

const UPDATE_CHANNEL_SIZE: usize = 128;

// ── RetryConfig ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts before the bypass flag is set. Default: 3.
    pub max_attempts: u32,
    /// Delay after the first failure. Default: 1s.
    pub base_delay: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
    /// Concurrent fetches across all channels. Default: 6.
    pub max_concurrent: usize,
    /// Retry state and resolved metadata untouched for this long are
    /// dropped by [`RetryScheduler::sweep`]. Default: 30min.
    pub idle_ttl: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_concurrent: 6,
            idle_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// Per-channel retry bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt_count: u32,
    /// Set once attempts are exhausted; the channel is shown unfiltered
    /// until usable metadata arrives.
    pub bypass: bool,
}

/// Outcome notifications for interested views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    Resolved(ChannelKey),
    Bypassed(ChannelKey),
}

/// A map value with the instant it was last written or read.
struct Stamped<T> {
    value: T,
    touched: Instant,
}

impl<T> Stamped<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            touched: Instant::now(),
        }
    }
}

/// Read `key` and mark it as used.
fn touch<T: Clone>(map: &DashMap<ChannelKey, Stamped<T>>, key: &ChannelKey) -> Option<T> {
    map.get_mut(key).map(|mut entry| {
        entry.touched = Instant::now();
        entry.value.clone()
    })
}

// ── RetryScheduler ──────────────────────────────────────────────────

/// Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: RetryConfig,
    source: Arc<dyn MetadataSource>,
    states: DashMap<ChannelKey, Stamped<RetryState>>,
    pending: DashMap<ChannelKey, ()>,
    resolved: DashMap<ChannelKey, Stamped<ChannelMetadata>>,
    permits: Semaphore,
    updates: broadcast::Sender<MetadataUpdate>,
    cancel: CancellationToken,
}

enum Outcome {
    Resolved,
    Bypassed,
    StillBypassed,
    Cancelled,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig, source: Arc<dyn MetadataSource>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                source,
                states: DashMap::new(),
                pending: DashMap::new(),
                resolved: DashMap::new(),
                permits,
                updates,
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.inner.config
    }

    /// Start fetching metadata for `key` unless a fetch is already pending.
    ///
    /// Returns `true` if a new fetch task was started.
    pub fn ensure(&self, key: &ChannelKey) -> bool {
        match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(channel = %key, "no async runtime, skipping metadata fetch");
            self.inner.pending.remove(key);
            return false;
        };

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        runtime.spawn(async move {
            let outcome = inner.run(&key).await;
            inner.pending.remove(&key);
            match outcome {
                Outcome::Resolved => {
                    let _ = inner.updates.send(MetadataUpdate::Resolved(key));
                }
                Outcome::Bypassed => {
                    let _ = inner.updates.send(MetadataUpdate::Bypassed(key));
                }
                Outcome::StillBypassed | Outcome::Cancelled => {}
            }
        });
        true
    }

    /// Record metadata observed through another path (snapshot records,
    /// profile updates). Tags present settle the channel.
    pub fn record(&self, metadata: ChannelMetadata) {
        if metadata.tags.is_some() {
            self.inner.states.remove(&metadata.channel_key);
            self.inner
                .resolved
                .insert(metadata.channel_key.clone(), Stamped::new(metadata));
        }
    }

    /// Forget everything known about `key`, including a resolved entry.
    pub fn invalidate(&self, key: &ChannelKey) {
        self.inner.resolved.remove(key);
        self.inner.states.remove(key);
    }

    pub fn state(&self, key: &ChannelKey) -> RetryState {
        touch(&self.inner.states, key).unwrap_or_default()
    }

    pub fn is_bypassed(&self, key: &ChannelKey) -> bool {
        self.state(key).bypass
    }

    pub fn is_pending(&self, key: &ChannelKey) -> bool {
        self.inner.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn metadata(&self, key: &ChannelKey) -> Option<ChannelMetadata> {
        touch(&self.inner.resolved, key)
    }

    pub fn resolved_tags(&self, key: &ChannelKey) -> Option<Vec<String>> {
        self.metadata(key).and_then(|m| m.tags)
    }

    /// Channels with retry state or resolved metadata held in memory.
    pub fn tracked_count(&self) -> usize {
        self.inner.states.len() + self.inner.resolved.len()
    }

    /// Drop retry state and resolved metadata idle for longer than
    /// `idle_ttl`. Channels with a fetch in flight are kept. Returns the
    /// number of entries removed.
    pub fn sweep(&self) -> usize {
        let ttl = self.inner.config.idle_ttl;
        let before = self.tracked_count();
        let pending = &self.inner.pending;
        self.inner
            .states
            .retain(|key, s| pending.contains_key(key) || s.touched.elapsed() < ttl);
        self.inner
            .resolved
            .retain(|key, m| pending.contains_key(key) || m.touched.elapsed() < ttl);
        let evicted = before.saturating_sub(self.tracked_count());
        if evicted > 0 {
            debug!(evicted, "swept idle channel metadata");
        }
        evicted
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetadataUpdate> {
        self.inner.updates.subscribe()
    }

    /// Stop every pending fetch. The scheduler accepts no new work after.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.permits.close();
    }
}

impl SchedulerInner {
    async fn run(&self, key: &ChannelKey) -> Outcome {
        loop {
            let result = {
                let Ok(_permit) = self.permits.acquire().await else {
                    return Outcome::Cancelled;
                };
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Outcome::Cancelled,
                    result = self.source.channel_metadata(key) => result,
                }
            };

            match result {
                Ok(metadata) if metadata.tags.is_some() => {
                    debug!(channel = %key, "metadata resolved");
                    self.states.remove(key);
                    self.resolved.insert(key.clone(), Stamped::new(metadata));
                    return Outcome::Resolved;
                }
                Ok(_) => debug!(channel = %key, "metadata arrived without tags"),
                Err(e) => debug!(channel = %key, error = %e, "metadata fetch failed"),
            }

            let (attempt, exhausted, newly_bypassed) = {
                let mut entry = self
                    .states
                    .entry(key.clone())
                    .or_insert_with(|| Stamped::new(RetryState::default()));
                entry.touched = Instant::now();
                let state = &mut entry.value;
                state.attempt_count += 1;
                let exhausted = state.attempt_count >= self.config.max_attempts;
                let newly_bypassed = exhausted && !state.bypass;
                state.bypass |= exhausted;
                (state.attempt_count, exhausted, newly_bypassed)
            };

            if exhausted {
                if newly_bypassed {
                    warn!(channel = %key, attempt, "metadata unavailable, bypassing tag filter");
                    return Outcome::Bypassed;
                }
                return Outcome::StillBypassed;
            }

            let delay = calculate_backoff(attempt, &self.config);
            debug!(channel = %key, attempt, ?delay, "retrying metadata fetch");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Outcome::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

// ── Backoff calculation ─────────────────────────────────────────────

/// `delay = min(base * 2^(attempt - 1), max)` for `attempt >= 1`.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    config
        .base_delay
        .saturating_mul(1_u32 << exponent)
        .min(config.max_delay)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::CoreError;

    /// Scripted metadata source: fails until `succeed_with` is set.
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        latency: Duration,
        succeed_with: Mutex<Option<Vec<String>>>,
    }

    #[async_trait]
    impl MetadataSource for FakeSource {
        async fn channel_metadata(&self, key: &ChannelKey) -> Result<ChannelMetadata, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let tags = self.succeed_with.lock().unwrap().clone();
            match tags {
                Some(tags) => Ok(ChannelMetadata {
                    channel_key: key.clone(),
                    name: None,
                    avatar: None,
                    online: None,
                    tags: Some(tags),
                }),
                None => Err(CoreError::Api {
                    message: "unavailable".into(),
                    status: Some(503),
                }),
            }
        }
    }

    fn key(n: usize) -> ChannelKey {
        ChannelKey::new(format!("visitor-{n}"), 251)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(1));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(2));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(4));
        assert_eq!(calculate_backoff(40, &config), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_set_bypass() {
        let source = Arc::new(FakeSource::default());
        let scheduler = RetryScheduler::new(RetryConfig::default(), source.clone());
        let mut updates = scheduler.subscribe();

        assert!(scheduler.ensure(&key(1)));
        assert_eq!(
            updates.recv().await.unwrap(),
            MetadataUpdate::Bypassed(key(1))
        );

        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        let state = scheduler.state(&key(1));
        assert_eq!(state.attempt_count, 3);
        assert!(state.bypass);
        assert!(!scheduler.is_pending(&key(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn later_success_clears_bypass() {
        let source = Arc::new(FakeSource::default());
        let scheduler = RetryScheduler::new(RetryConfig::default(), source.clone());
        let mut updates = scheduler.subscribe();

        scheduler.ensure(&key(1));
        updates.recv().await.unwrap();
        assert!(scheduler.is_bypassed(&key(1)));

        *source.succeed_with.lock().unwrap() = Some(vec!["vip".into()]);
        scheduler.ensure(&key(1));
        assert_eq!(
            updates.recv().await.unwrap(),
            MetadataUpdate::Resolved(key(1))
        );
        assert!(!scheduler.is_bypassed(&key(1)));
        assert_eq!(scheduler.resolved_tags(&key(1)), Some(vec!["vip".into()]));
    }

    #[tokio::test(start_paused = true)]
    async fn one_pending_fetch_per_channel() {
        let source = Arc::new(FakeSource {
            latency: Duration::from_millis(50),
            succeed_with: Mutex::new(Some(Vec::new())),
            ..FakeSource::default()
        });
        let scheduler = RetryScheduler::new(RetryConfig::default(), source.clone());
        let mut updates = scheduler.subscribe();

        assert!(scheduler.ensure(&key(1)));
        assert!(!scheduler.ensure(&key(1)));
        assert!(scheduler.is_pending(&key(1)));

        updates.recv().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.resolved_tags(&key(1)), Some(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_are_capped() {
        let source = Arc::new(FakeSource {
            latency: Duration::from_millis(100),
            succeed_with: Mutex::new(Some(vec!["vip".into()])),
            ..FakeSource::default()
        });
        let scheduler = RetryScheduler::new(RetryConfig::default(), source.clone());
        let mut updates = scheduler.subscribe();

        for n in 0..20 {
            assert!(scheduler.ensure(&key(n)));
        }
        for _ in 0..20 {
            updates.recv().await.unwrap();
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 20);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 6);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_are_swept() {
        let config = RetryConfig {
            idle_ttl: Duration::from_secs(600),
            ..RetryConfig::default()
        };
        let scheduler = RetryScheduler::new(config, Arc::new(FakeSource::default()));
        let mut updates = scheduler.subscribe();

        for n in 0..50 {
            scheduler.ensure(&key(n));
        }
        for _ in 0..50 {
            updates.recv().await.unwrap();
        }
        scheduler.record(ChannelMetadata {
            channel_key: key(100),
            name: None,
            avatar: None,
            online: None,
            tags: Some(vec!["vip".into()]),
        });
        assert_eq!(scheduler.tracked_count(), 51);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(scheduler.sweep(), 0);
        // Reads keep an entry alive.
        assert!(scheduler.is_bypassed(&key(7)));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(scheduler.sweep(), 50);
        assert!(scheduler.is_bypassed(&key(7)));
        assert_eq!(scheduler.state(&key(8)), RetryState::default());
        assert!(scheduler.resolved_tags(&key(100)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_channels_with_a_fetch_in_flight() {
        let config = RetryConfig {
            idle_ttl: Duration::from_secs(1),
            ..RetryConfig::default()
        };
        let source = Arc::new(FakeSource {
            latency: Duration::from_secs(10),
            ..FakeSource::default()
        });
        let scheduler = RetryScheduler::new(config, source.clone());

        scheduler.ensure(&key(1));
        // Attempt one fails at 10s, attempt two is in flight from 11s to 21s.
        tokio::time::sleep(Duration::from_millis(20_500)).await;

        assert!(scheduler.is_pending(&key(1)));
        assert_eq!(scheduler.sweep(), 0);
        assert_eq!(scheduler.state(&key(1)).attempt_count, 1);
    }

    #[tokio::test]
    async fn recorded_tags_settle_the_channel() {
        let scheduler = RetryScheduler::new(RetryConfig::default(), Arc::new(FakeSource::default()));
        scheduler.record(ChannelMetadata {
            channel_key: key(1),
            name: Some("Ada".into()),
            avatar: None,
            online: Some(true),
            tags: Some(vec!["sales".into()]),
        });
        assert_eq!(scheduler.resolved_tags(&key(1)), Some(vec!["sales".into()]));

        scheduler.invalidate(&key(1));
        assert!(scheduler.metadata(&key(1)).is_none());
    }
}
