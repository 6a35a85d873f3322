//! In-process counter store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, EpochMillis, SystemClock};
use crate::error::StoreError;
use crate::store::{CounterStore, WindowCount};

/// Entry count above which expired windows are swept on insert.
const SWEEP_HIGH_WATER: usize = 4_096;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    reset_at: EpochMillis,
}

/// Counter store backed by a mutex-guarded map.
///
/// Counts are local to the process, which is exactly what the failover path
/// wants: degraded accuracy beats refusing traffic while the shared store is
/// down. Expired windows are dropped lazily on the next increment for their
/// key, plus a bulk sweep when the map grows past a high-water mark.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build a store that reads time from `clock` instead of the system.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// Number of live (possibly expired, not yet swept) windows.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("counter map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = self.clock.now_millis();
        let window_millis: u64 = window.as_millis().try_into().unwrap_or(u64::MAX);

        let mut entries = self.entries.lock().expect("counter map lock poisoned");

        if entries.len() >= SWEEP_HIGH_WATER && !entries.contains_key(key) {
            entries.retain(|_, entry| entry.reset_at > now);
        }

        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if now >= entry.reset_at {
                    // Window elapsed; anchor a fresh one at this request.
                    entry.count = 1;
                    entry.reset_at = now.saturating_add(window_millis);
                } else {
                    entry.count += 1;
                }
            })
            .or_insert(Entry { count: 1, reset_at: now.saturating_add(window_millis) });

        Ok(WindowCount { count: entry.count, reset_at: entry.reset_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const WINDOW: Duration = Duration::from_secs(60);

    fn store_at(start: EpochMillis) -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(start);
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn first_increment_anchors_the_window() {
        let (store, _) = store_at(10_000);
        let wc = store.incr("k", WINDOW).await.unwrap();
        assert_eq!(wc.count, 1);
        assert_eq!(wc.reset_at, 70_000);
    }

    #[tokio::test]
    async fn window_does_not_slide_on_later_hits() {
        let (store, clock) = store_at(0);
        let first = store.incr("k", WINDOW).await.unwrap();

        clock.advance(Duration::from_secs(30));
        let second = store.incr("k", WINDOW).await.unwrap();

        assert_eq!(second.count, 2);
        assert_eq!(second.reset_at, first.reset_at);
    }

    #[tokio::test]
    async fn expired_window_restarts_at_one() {
        let (store, clock) = store_at(0);
        store.incr("k", WINDOW).await.unwrap();
        store.incr("k", WINDOW).await.unwrap();

        clock.advance(Duration::from_secs(61));
        let wc = store.incr("k", WINDOW).await.unwrap();
        assert_eq!(wc.count, 1);
        assert_eq!(wc.reset_at, 61_000 + 60_000);
    }

    #[tokio::test]
    async fn keys_count_independently() {
        let (store, _) = store_at(0);
        store.incr("a", WINDOW).await.unwrap();
        store.incr("a", WINDOW).await.unwrap();
        let wc = store.incr("b", WINDOW).await.unwrap();
        assert_eq!(wc.count, 1);
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries_under_pressure() {
        let (store, clock) = store_at(0);
        for i in 0..SWEEP_HIGH_WATER {
            store.incr(&format!("k{i}"), WINDOW).await.unwrap();
        }
        assert_eq!(store.len(), SWEEP_HIGH_WATER);

        clock.advance(Duration::from_secs(120));
        store.incr("fresh", WINDOW).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn ping_is_always_live() {
        let (store, _) = store_at(0);
        assert!(store.ping().await.is_ok());
    }
}
