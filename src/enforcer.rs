//! The quota enforcer: one decision point for "may this identity perform
//! this category of action right now?".
//!
//! One enforcer serves every category; the category arrives as a call
//! argument and the [`PolicyTable`] holds every limit in one place. The
//! enforcer is written against the [`CounterStore`] trait only; which backend
//! sits behind it (memory, Redis, failover) is decided by whoever wires the
//! process together.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::{Clock, EpochMillis, SystemClock};
use crate::error::PolicyError;
use crate::policy::{Allowance, PolicyTable, Tier};
use crate::store::CounterStore;

/// Namespace prefix for every store key.
pub const KEY_NAMESPACE: &str = "rl";

/// Outcome of a quota check.
///
/// Denial is a normal, expected outcome and therefore a value, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        /// Requests left in the window after this one. `u64::MAX` for
        /// unlimited allowances.
        remaining: u64,
        /// When the window expires and the count resets.
        reset_at: EpochMillis,
    },
    Denied {
        /// How long the caller should wait before retrying.
        retry_after: Duration,
        reset_at: EpochMillis,
        /// Category-specific text for the end user.
        reason: Arc<str>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// The retry hint, if this decision was a denial.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Denied { retry_after, .. } => Some(*retry_after),
            Decision::Allowed { .. } => None,
        }
    }
}

/// Quota decision point over a counter store and a policy table.
#[derive(Clone)]
pub struct QuotaEnforcer {
    store: Arc<dyn CounterStore>,
    policy: PolicyTable,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for QuotaEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEnforcer")
            .field("policy", &self.policy)
            .field("store", &"<counter store>")
            .finish()
    }
}

impl QuotaEnforcer {
    pub fn new(store: Arc<dyn CounterStore>, policy: PolicyTable) -> Self {
        Self { store, policy, clock: Arc::new(SystemClock) }
    }

    /// Read time from `clock` instead of the system (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    /// Derive the store key for `(category, identity)`.
    ///
    /// Categories are colon-free (the policy builder enforces it), so the
    /// first two segments pin the category and identities can never collide
    /// across categories.
    fn derive_key(category: &str, identity: &str) -> String {
        format!("{KEY_NAMESPACE}:{category}:{identity}")
    }

    /// Decide whether `identity` may perform one `category` action.
    ///
    /// Every call consumes one slot in the window, including calls that end
    /// in denial; rejected attempts count too. The tier is resolved fresh on
    /// every call from the caller-supplied value, never cached.
    ///
    /// Wire the enforcer to a store that can always answer: an in-process
    /// [`MemoryStore`](crate::store::MemoryStore) or a
    /// [`FailoverStore`](crate::store::FailoverStore) over a networked one.
    /// A bare networked store that goes unavailable makes every check fail
    /// open, so nothing is enforced for the length of the outage.
    ///
    /// The only error is [`PolicyError::UnknownCategory`], a programmer
    /// mistake that [`PolicyTable::validate`] catches at startup.
    pub async fn check(
        &self,
        identity: &str,
        category: &str,
        tier: Tier,
    ) -> Result<Decision, PolicyError> {
        let limit = self.policy.resolve(category, tier)?;
        let key = Self::derive_key(category, identity);

        let window_count = match self.store.incr(&key, limit.window).await {
            Ok(wc) => wc,
            Err(e) => {
                // Only reachable when wired to a bare networked store with no
                // failover layer. Fail open: an infrastructure blip must not
                // deny legitimate traffic.
                warn!(error = %e, category, "counter store failed without fallback; allowing request");
                let reset_at = self
                    .clock
                    .now_millis()
                    .saturating_add(limit.window.as_millis().try_into().unwrap_or(u64::MAX));
                return Ok(match limit.allowance {
                    Allowance::Unlimited => Decision::Allowed { remaining: u64::MAX, reset_at },
                    Allowance::Limited(n) => {
                        Decision::Allowed { remaining: n.saturating_sub(1), reset_at }
                    }
                });
            }
        };

        let decision = match limit.allowance {
            Allowance::Unlimited => Decision::Allowed {
                remaining: u64::MAX,
                reset_at: window_count.reset_at,
            },
            Allowance::Limited(max) if window_count.count <= max => Decision::Allowed {
                remaining: max - window_count.count,
                reset_at: window_count.reset_at,
            },
            Allowance::Limited(_) => {
                let now = self.clock.now_millis();
                let retry_after =
                    Duration::from_millis(window_count.reset_at.saturating_sub(now));
                debug!(category, tier = %tier, count = window_count.count, "quota exhausted");
                Decision::Denied {
                    retry_after,
                    reset_at: window_count.reset_at,
                    reason: limit.exhausted_message,
                }
            }
        };

        Ok(decision)
    }
}
