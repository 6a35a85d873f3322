//! Counter store abstraction and its backends.
//!
//! A counter store provides one operation: atomically increment a keyed
//! counter inside a fixed tumbling window and report the new count together
//! with the instant the window expires. The window is anchored at first use;
//! it never slides.
//!
//! Backends:
//! - [`memory::MemoryStore`]: per-process counters behind a mutex.
//! - [`redis::RedisStore`]: shared counters in Redis, incremented server-side
//!   so concurrent processes agree on the count.
//! - [`failover::FailoverStore`]: primary plus in-process fallback; absorbs
//!   `Unavailable` faults so enforcement stays live through an outage.
//!
//! Atomicity is the whole point of the seam. A read-then-write at a higher
//! layer would let two racing requests both observe `count = limit - 1` and
//! both pass; the store must do the increment itself.

use async_trait::async_trait;
use std::time::Duration;

use crate::clock::EpochMillis;
use crate::error::StoreError;

pub mod failover;
pub mod memory;
pub mod redis;

pub use failover::FailoverStore;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Result of one counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Consumed requests in the current window, including this one.
    pub count: u64,
    /// When the window expires and the counter resets.
    pub reset_at: EpochMillis,
}

/// Atomic "increment and get, with expiry" keyed by an opaque string.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`.
    ///
    /// On first call for a key this initializes the count to 1 and arms an
    /// expiry `window` in the future. Later calls within the window increment
    /// atomically and return the original `reset_at`.
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;

    /// Cheap liveness probe. Backends with a network connection override this;
    /// in-process backends are always live.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
