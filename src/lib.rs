#![forbid(unsafe_code)]

//! # Tollbooth
//!
//! Tiered quota enforcement for async Rust: tumbling-window counters,
//! pluggable stores, and silent failover.
//!
//! ## Features
//!
//! - **One decision point**: [`QuotaEnforcer::check`] answers "may this
//!   identity perform this category of action right now?" for every rate
//!   limited operation in the process.
//! - **Policy table** with per-category windows and per-tier allowances,
//!   including an unlimited sentinel, selected once at startup from a named
//!   profile or JSON config.
//! - **Pluggable counter stores**: in-process, Redis, or a failover pair
//!   that rides out store outages on a local counter instead of refusing
//!   traffic.
//! - **Tower middleware** for wiring the enforcer into an HTTP stack.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tollbooth::{categories, Decision, Profile, QuotaEnforcer, Tier};
//! use tollbooth::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tollbooth::PolicyError> {
//!     let table = Profile::Strict.table();
//!     table.validate(categories::ALL)?;
//!
//!     let enforcer = QuotaEnforcer::new(Arc::new(MemoryStore::new()), table);
//!
//!     match enforcer.check("user-42", categories::KUNDLI, Tier::Free).await? {
//!         Decision::Allowed { remaining, .. } => println!("go ahead ({remaining} left)"),
//!         Decision::Denied { retry_after, .. } => println!("retry in {retry_after:?}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod enforcer;
pub mod error;
pub mod jitter;
pub mod middleware;
pub mod policy;
pub mod prelude;
pub mod sleeper;
pub mod store;

// Re-exports
pub use backoff::Backoff;
pub use clock::{Clock, EpochMillis, ManualClock, SystemClock};
pub use enforcer::{Decision, QuotaEnforcer, KEY_NAMESPACE};
pub use error::{PolicyError, StoreError};
pub use jitter::Jitter;
pub use middleware::{QuotaLayer, QuotaService, QuotaServiceError, RequestClass};
pub use policy::{
    categories, Allowance, CategoryPolicy, PolicyTable, PolicyTableBuilder, Profile, Tier,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{CounterStore, FailoverStore, MemoryStore, RedisStore, WindowCount};
