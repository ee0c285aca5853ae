//! Breaker-guarded producer.
//!
//! Wraps any [`AnalysisProducer`] so every call is admitted, counted and
//! rejected by a [`Breaker`] keyed on the producer id. The orchestrator sees
//! an ordinary producer and never touches breaker state itself.

use crate::{AnalysisProducer, ProducerRequest, RawAnalysis};
use async_trait::async_trait;
use ideafit_core::{IdeaFitError, IdeaFitResult};
use ideafit_resilience::{call_through, Breaker, BreakerError};
use std::sync::Arc;
use tracing::{debug, warn};

type Fallback = Arc<dyn Fn() -> RawAnalysis + Send + Sync>;

pub struct GuardedProducer<P> {
    inner: P,
    breaker: Arc<dyn Breaker>,
    fallback: Option<Fallback>,
}

impl<P: AnalysisProducer> GuardedProducer<P> {
    pub fn new(inner: P, breaker: Arc<dyn Breaker>) -> Self {
        Self {
            inner,
            breaker,
            fallback: None,
        }
    }

    /// Degraded payload returned instead of an error, both when the breaker
    /// rejects the call and when the producer fails.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> RawAnalysis + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn breaker(&self) -> &Arc<dyn Breaker> {
        &self.breaker
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: AnalysisProducer> AnalysisProducer for GuardedProducer<P> {
    fn producer_id(&self) -> &str {
        self.inner.producer_id()
    }

    async fn produce(&self, request: ProducerRequest) -> IdeaFitResult<RawAnalysis> {
        let domain = self.inner.producer_id();
        let result = call_through(self.breaker.as_ref(), domain, || {
            self.inner.produce(request)
        })
        .await;

        match (result, &self.fallback) {
            (Ok(raw), _) => Ok(raw),
            (Err(BreakerError::Open { .. }), Some(fallback)) => {
                debug!(domain = %domain, "Breaker open, serving fallback");
                Ok(fallback())
            }
            (Err(BreakerError::Operation(e)), Some(fallback)) => {
                warn!(domain = %domain, error = %e, "Producer failed, serving fallback");
                Ok(fallback())
            }
            (Err(e), None) => Err(IdeaFitError::from(e)),
        }
    }
}

impl<P> std::fmt::Debug for GuardedProducer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedProducer")
            .field("strategy", &self.breaker.strategy())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
