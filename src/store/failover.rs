//! Primary/fallback composition of counter stores.
//!
//! Availability of quota enforcement is preferred over strict global
//! accuracy: when the shared store drops out, requests are counted in an
//! independent in-process store instead of being refused or waved through.
//! Double-counting across the transition is the accepted cost.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::StoreError;
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::store::memory::MemoryStore;
use crate::store::redis::RedisStore;
use crate::store::{CounterStore, WindowCount};

/// Schedule for background reconnect probes.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_probes: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_probes: 8,
            // 500ms, 1s, 2s, ... capped at one minute.
            backoff: Backoff::exponential(Duration::from_millis(500))
                .with_max(Duration::from_secs(60))
                .unwrap_or_else(|_| Backoff::constant(Duration::from_secs(1))),
            jitter: Jitter::full(),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl ReconnectPolicy {
    pub fn new(max_probes: usize, backoff: Backoff) -> Self {
        Self { max_probes, backoff, ..Self::default() }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }
}

#[derive(Debug, Default)]
struct Link {
    disconnected: AtomicBool,
    probing: AtomicBool,
    exhausted: AtomicBool,
}

/// Counter store that serves from `primary` until it becomes unavailable,
/// then from `fallback` while a background task probes for recovery.
///
/// Probes never run on the request path: an in-flight [`CounterStore::incr`]
/// that hits an unavailable primary flips straight to the fallback and
/// returns. After the probe budget is exhausted the store pins itself to the
/// fallback for the rest of the process lifetime.
pub struct FailoverStore<P, F = MemoryStore> {
    primary: Arc<P>,
    fallback: Arc<F>,
    link: Arc<Link>,
    reconnect: ReconnectPolicy,
}

impl<P, F> Clone for FailoverStore<P, F> {
    fn clone(&self) -> Self {
        Self {
            primary: self.primary.clone(),
            fallback: self.fallback.clone(),
            link: self.link.clone(),
            reconnect: self.reconnect.clone(),
        }
    }
}

impl<P, F> std::fmt::Debug for FailoverStore<P, F>
where
    P: CounterStore + 'static,
    F: CounterStore + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverStore")
            .field("connected", &self.is_connected())
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl<P, F> FailoverStore<P, F>
where
    P: CounterStore + 'static,
    F: CounterStore + 'static,
{
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary: Arc::new(primary),
            fallback: Arc::new(fallback),
            link: Arc::new(Link::default()),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Whether requests are currently served by the primary store.
    pub fn is_connected(&self) -> bool {
        !self.link.disconnected.load(Ordering::Acquire)
    }

    fn spawn_probe(&self) {
        if self.link.exhausted.load(Ordering::Acquire) {
            return;
        }
        if self.link.probing.swap(true, Ordering::AcqRel) {
            return;
        }

        let primary = self.primary.clone();
        let link = self.link.clone();
        let reconnect = self.reconnect.clone();

        tokio::spawn(async move {
            for attempt in 1..=reconnect.max_probes {
                let delay = reconnect.jitter.apply(reconnect.backoff.delay(attempt));
                reconnect.sleeper.sleep(delay).await;

                match primary.ping().await {
                    Ok(()) => {
                        link.disconnected.store(false, Ordering::Release);
                        link.probing.store(false, Ordering::Release);
                        info!(attempt, "primary counter store reachable again");
                        return;
                    }
                    Err(e) => {
                        debug!(attempt, error = %e, "reconnect probe failed");
                    }
                }
            }

            error!(
                probes = reconnect.max_probes,
                "reconnect probes exhausted; staying on in-process fallback"
            );
            link.exhausted.store(true, Ordering::Release);
            link.probing.store(false, Ordering::Release);
        });
    }
}

#[async_trait]
impl<P, F> CounterStore for FailoverStore<P, F>
where
    P: CounterStore + 'static,
    F: CounterStore + 'static,
{
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        if self.is_connected() {
            match self.primary.incr(key, window).await {
                Ok(wc) => return Ok(wc),
                Err(e) => {
                    warn!(error = %e, "primary counter store unavailable; switching to in-process fallback");
                    self.link.disconnected.store(true, Ordering::Release);
                    self.spawn_probe();
                }
            }
        }
        self.fallback.incr(key, window).await
    }
}

/// Startup wiring: a Redis primary with in-process fallback, or the
/// in-process store alone if the initial connection fails.
pub async fn redis_or_memory(url: &str) -> Arc<dyn CounterStore> {
    match RedisStore::connect(url).await {
        Ok(primary) => Arc::new(FailoverStore::new(primary, MemoryStore::new())),
        Err(e) => {
            warn!(error = %e, "counter store unreachable at startup; using in-process store only");
            Arc::new(MemoryStore::new())
        }
    }
}
