//! Jitter for the reconnect schedule.
//!
//! When several processes lose the same store at once, jitter keeps their
//! probes from landing in lockstep when it comes back.

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy applied on top of a [`crate::Backoff`] delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Use the exact backoff delay. Deterministic probes for tests.
    None,
    /// Uniform in `[0, delay]`.
    Full,
}

impl Jitter {
    pub fn none() -> Self {
        Jitter::None
    }

    pub fn full() -> Self {
        Jitter::Full
    }

    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Apply jitter with a caller-supplied RNG (for testing).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                // Millisecond precision; saturate very large delays.
                let millis: u64 = delay.as_millis().try_into().unwrap_or(u64::MAX);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let delay = Duration::from_millis(750);
        assert_eq!(Jitter::none().apply(delay), delay);
    }

    #[test]
    fn full_stays_within_bounds() {
        let delay = Duration::from_millis(1_000);
        for _ in 0..100 {
            let jittered = Jitter::full().apply(delay);
            assert!(jittered <= delay);
        }
    }

    #[test]
    fn full_handles_zero_delay() {
        assert_eq!(Jitter::full().apply(Duration::ZERO), Duration::ZERO);
    }
}
