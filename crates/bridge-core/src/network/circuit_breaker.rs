//! Circuit breaker guarding the client's exchange with its peer.
//!
//! - CLOSED: calls flow through, outcomes are kept in a rolling time window
//! - OPEN: calls are rejected immediately without touching the peer
//! - HALF_OPEN: a limited number of probe calls decide whether to close again

use crate::config::NetworkConfig;
use crate::error::{BridgeError, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests flow through.
    Closed,
    /// Failing - requests are rejected immediately.
    Open,
    /// Testing recovery - limited requests allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure percentage that must be strictly exceeded to open.
    pub error_threshold_percentage: u32,
    /// Samples required in the window before the percentage is considered.
    pub minimum_requests: usize,
    /// Age after which an outcome no longer counts.
    pub rolling_window: Duration,
    /// Time spent open before a probe is allowed.
    pub reset_timeout: Duration,
    /// Maximum number of probe requests in half-open state.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: NetworkConfig::CIRCUIT_BREAKER_ERROR_THRESHOLD_PERCENTAGE,
            minimum_requests: NetworkConfig::CIRCUIT_BREAKER_MINIMUM_REQUESTS,
            rolling_window: NetworkConfig::CIRCUIT_BREAKER_ROLLING_WINDOW,
            reset_timeout: NetworkConfig::CIRCUIT_BREAKER_RESET_TIMEOUT,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// `(when, succeeded)` for every outcome recorded while closed.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    half_open_calls: u32,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
}

impl BreakerInner {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(&(at, _)) = self.window.front() {
            if now.duration_since(at) > window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> usize {
        self.window.iter().filter(|(_, ok)| !ok).count()
    }
}

/// Circuit breaker for one peer endpoint.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    /// Endpoint this circuit breaker protects.
    endpoint: String,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_config(endpoint, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            endpoint: endpoint.into(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_calls: 0,
                total_failures: 0,
                total_successes: 0,
                total_rejected: 0,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run `operation` under the breaker.
    ///
    /// When the circuit rejects the call the future is dropped unpolled and
    /// `CircuitOpen` is returned. Otherwise its outcome is recorded. A call
    /// dropped before it completes is recorded as a failure, so a cancelled
    /// probe reopens the circuit instead of holding its half-open slot.
    pub async fn call<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.allow_request() {
            return Err(BridgeError::CircuitOpen {
                endpoint: self.endpoint.clone(),
            });
        }

        let permit = CallPermit {
            breaker: self,
            settled: false,
        };
        match operation.await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Guarded call failed");
                permit.fail();
                Err(e)
            }
        }
    }

    /// Get the current state of the circuit.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Check if a request should be allowed through.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        self.maybe_transition_to_half_open(&mut inner);

        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !allowed {
            inner.total_rejected += 1;
        }
        allowed
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;

        match inner.state {
            CircuitState::Closed => {
                let now = Instant::now();
                inner.window.push_back((now, true));
                inner.prune(self.config.rolling_window, now);
            }
            CircuitState::HalfOpen => self.transition_to_closed(&mut inner),
            CircuitState::Open => {}
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                let now = Instant::now();
                inner.window.push_back((now, false));
                inner.prune(self.config.rolling_window, now);

                let samples = inner.window.len();
                let failures = inner.failures();
                if samples >= self.config.minimum_requests
                    && failures * 100 > self.config.error_threshold_percentage as usize * samples
                {
                    warn!(
                        endpoint = %self.endpoint,
                        failures,
                        samples,
                        "Circuit breaker opened"
                    );
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                warn!(endpoint = %self.endpoint, "Probe failed, circuit breaker reopened");
                self.transition_to_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Get statistics about this circuit breaker.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        self.maybe_transition_to_half_open(&mut inner);
        let now = Instant::now();
        inner.prune(self.config.rolling_window, now);

        CircuitBreakerStats {
            endpoint: self.endpoint.clone(),
            state: inner.state,
            window_requests: inner.window.len(),
            window_failures: inner.failures(),
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejected: inner.total_rejected,
            time_in_state: match inner.state {
                CircuitState::Closed => Duration::ZERO,
                CircuitState::Open | CircuitState::HalfOpen => inner
                    .opened_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or(Duration::ZERO),
            },
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.half_open_calls = 0;
        info!(endpoint = %self.endpoint, "Circuit breaker reset to CLOSED");
    }

    // Internal state transitions

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // The inner state is always left consistent, so a poisoned lock is
        // still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_calls = 0;
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.half_open_calls = 0;
        info!(endpoint = %self.endpoint, "Circuit breaker recovered to CLOSED");
    }

    fn maybe_transition_to_half_open(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened) = inner.opened_at {
            if opened.elapsed() >= self.config.reset_timeout {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_calls = 0;
                debug!(endpoint = %self.endpoint, "Circuit breaker entering HALF_OPEN");
            }
        }
    }
}

/// An admitted call whose outcome has not been recorded yet.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(endpoint = %self.breaker.endpoint, "Guarded call cancelled");
            self.breaker.record_failure();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// Statistics about a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub endpoint: String,
    pub state: CircuitState,
    /// Outcomes currently inside the rolling window.
    pub window_requests: usize,
    pub window_failures: usize,
    pub total_failures: u64,
    pub total_successes: u64,
    /// Calls refused without running.
    pub total_rejected: u64,
    pub time_in_state: Duration,
}
