//! Client-side resilience.
//!
//! This module provides:
//! - Circuit breaker guarding the exchange with the peer
//! - Retry logic with exponential backoff and jitter

mod circuit_breaker;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use retry::{retry_async, RetryConfig, RetryStats};
