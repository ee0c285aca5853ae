//! IdeaFit Resilience - Failure Isolation
//!
//! Two failure-tracking mechanisms for upstream dependencies:
//! - [`CircuitBreaker`] - closed / open / half-open state machine, one per domain
//! - [`WindowTracker`] - per-domain failure counter over a sliding window
//!
//! Both sit behind the [`Breaker`] trait so callers pick semantics through
//! configuration ([`ideafit_core::BreakerStrategy`]) instead of code.

pub mod breaker;
pub mod registry;
pub mod strategy;
pub mod window;

pub use breaker::{BreakerError, BreakerSnapshot, CircuitBreaker};
pub use registry::BreakerRegistry;
pub use strategy::{build_breaker, call_through, Breaker};
pub use window::{WindowBreaker, WindowTracker};
