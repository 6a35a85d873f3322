//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tollbooth::store::{CounterStore, MemoryStore, WindowCount};
use tollbooth::StoreError;

/// Counter store that can be failed and healed from a test body. Wraps a
/// [`MemoryStore`] so counts survive across an outage, like a real server
/// that went unreachable rather than losing its data.
#[derive(Debug, Clone, Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    down: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    /// Total `incr` calls, including ones that failed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        self.inner.incr(key, window).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}
