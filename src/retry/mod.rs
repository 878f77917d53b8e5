//! Retry policy: a bounded retry counter and a feature-scoped circuit breaker.

mod bounded;
mod breaker;

pub use bounded::{BoundedRetry, RetryDecision};
pub use breaker::{BreakerVerdict, CircuitBreaker, FailureSignature};
