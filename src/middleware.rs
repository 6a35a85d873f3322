//! Tower middleware over the quota enforcer.
//!
//! The HTTP layer owns identity resolution; this middleware only needs a
//! classifier that maps each request to `(identity, category, tier)`. A
//! denial surfaces as [`QuotaServiceError::Limited`] carrying the retry hint
//! and the category's user-facing message, which the outer layer translates
//! into a 429 with a `Retry-After` header.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tower_layer::Layer;
use tower_service::Service;

use crate::clock::EpochMillis;
use crate::enforcer::{Decision, QuotaEnforcer};
use crate::error::PolicyError;
use crate::policy::Tier;

/// How one request is classified for quota purposes.
#[derive(Debug, Clone)]
pub struct RequestClass {
    /// Authenticated user id, or the caller's address when anonymous.
    pub identity: String,
    pub category: String,
    pub tier: Tier,
}

/// Error type of [`QuotaService`].
#[derive(Debug, Error)]
pub enum QuotaServiceError<E> {
    /// The request was denied by quota. Not a fault; the outer layer turns
    /// this into a 429 response.
    #[error("{reason}")]
    Limited {
        retry_after: Duration,
        reset_at: EpochMillis,
        reason: Arc<str>,
    },

    /// The classifier produced a category the policy table does not know.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The wrapped service failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> QuotaServiceError<E> {
    /// The retry hint, if this is a quota denial.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Limited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }
}

/// A layer that enforces quotas using a [`QuotaEnforcer`].
#[derive(Debug)]
pub struct QuotaLayer<X> {
    enforcer: Arc<QuotaEnforcer>,
    classify: Arc<X>,
}

impl<X> QuotaLayer<X> {
    pub fn new(enforcer: QuotaEnforcer, classify: X) -> Self {
        Self { enforcer: Arc::new(enforcer), classify: Arc::new(classify) }
    }
}

impl<X> Clone for QuotaLayer<X> {
    fn clone(&self) -> Self {
        Self { enforcer: self.enforcer.clone(), classify: self.classify.clone() }
    }
}

impl<S, X> Layer<S> for QuotaLayer<X> {
    type Service = QuotaService<S, X>;

    fn layer(&self, service: S) -> Self::Service {
        QuotaService {
            inner: service,
            enforcer: self.enforcer.clone(),
            classify: self.classify.clone(),
        }
    }
}

/// Middleware service that checks the quota before each call.
#[derive(Debug)]
pub struct QuotaService<S, X> {
    inner: S,
    enforcer: Arc<QuotaEnforcer>,
    classify: Arc<X>,
}

impl<S: Clone, X> Clone for QuotaService<S, X> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            enforcer: self.enforcer.clone(),
            classify: self.classify.clone(),
        }
    }
}

impl<S, X, Req> Service<Req> for QuotaService<S, X>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    X: Fn(&Req) -> RequestClass + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = QuotaServiceError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(QuotaServiceError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let class = (self.classify)(&req);
        let enforcer = self.enforcer.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match enforcer.check(&class.identity, &class.category, class.tier).await? {
                Decision::Allowed { .. } => {
                    inner.call(req).await.map_err(QuotaServiceError::Inner)
                }
                Decision::Denied { retry_after, reset_at, reason } => {
                    Err(QuotaServiceError::Limited { retry_after, reset_at, reason })
                }
            }
        })
    }
}
