//! Error types for quota enforcement.
//!
//! The taxonomy is deliberately small:
//! - [`StoreError`] covers transient infrastructure faults at the counter
//!   store seam. The failover store absorbs these; callers of the enforcer
//!   never see them.
//! - [`PolicyError`] covers configuration mistakes. These are startup-time
//!   failures caught by [`crate::PolicyTable::validate`], never expected once
//!   a process is serving traffic.
//!
//! A denied request is not an error at all; it is the
//! [`crate::Decision::Denied`] variant.

use thiserror::Error;

/// Faults raised by a counter store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached, or did not answer within the
    /// configured deadline. Treated identically either way.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Configuration errors surfaced when building or resolving policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The category was never registered in the policy table.
    #[error("unknown quota category {0:?}")]
    UnknownCategory(String),

    /// A category definition violates a table invariant.
    #[error("invalid policy for category {category:?}: {reason}")]
    InvalidPolicy { category: String, reason: String },

    /// The configured profile name is not one of the known profiles.
    #[error("unknown policy profile {0:?} (expected \"relaxed\" or \"strict\")")]
    UnknownProfile(String),

    /// Policy configuration could not be parsed at all.
    #[error("malformed policy config: {0}")]
    MalformedConfig(String),
}

impl PolicyError {
    pub fn is_unknown_category(&self) -> bool {
        matches!(self, Self::UnknownCategory(_))
    }

    pub(crate) fn invalid(category: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy { category: category.to_string(), reason: reason.into() }
    }
}
