//! Clock abstractions used by counter stores and the quota enforcer.
//!
//! Window expiry is wall-clock time (counters must agree across processes
//! sharing a networked store), so the clock hands out epoch milliseconds
//! rather than a monotonic instant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = u64;

/// Clock abstraction so window timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> EpochMillis;
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn epoch_millis_now() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Wall clock backed by `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> EpochMillis {
        epoch_millis_now()
    }
}

/// Test clock that only moves when told to.
///
/// Cloning shares the underlying time source, so a clock handed to a store
/// can be advanced from the test body.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: EpochMillis) -> Self {
        Self { millis: Arc::new(AtomicU64::new(start)) }
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, millis: EpochMillis) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> EpochMillis {
        self.millis.load(Ordering::SeqCst)
    }
}
