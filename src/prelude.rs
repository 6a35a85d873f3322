//! Convenient re-exports for common Tollbooth types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    clock::{Clock, EpochMillis, SystemClock},
    enforcer::{Decision, QuotaEnforcer},
    error::{PolicyError, StoreError},
    jitter::Jitter,
    middleware::{QuotaLayer, QuotaServiceError, RequestClass},
    policy::{categories, Allowance, CategoryPolicy, PolicyTable, Profile, Tier},
    store::{
        failover::{redis_or_memory, ReconnectPolicy},
        CounterStore, FailoverStore, MemoryStore, RedisStore, WindowCount,
    },
};
