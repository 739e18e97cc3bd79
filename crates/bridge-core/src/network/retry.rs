//! Retry with exponential backoff and jitter.
//!
//! Only errors for which [`BridgeError::is_retryable`] holds are retried:
//! timeouts and transport failures. An open circuit is never retried.

use crate::error::{BridgeError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one). `1` disables
    /// retrying.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub exponential_base: f64,
    /// Whether to add random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay after a given failed attempt (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // Factor in 0.5..1.5 keeps the mean and never approaches zero.
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Statistics about a retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is used up.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, mut operation: F) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        let error: BridgeError = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "Request succeeded after retrying");
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(error.to_string());

        if !error.is_retryable() {
            return (Err(error), stats);
        }

        if attempt + 1 >= max_attempts {
            if max_attempts > 1 {
                warn!(attempts = max_attempts, error = %error, "All retry attempts exhausted");
            }
            return (Err(error), stats);
        }

        let delay = config.calculate_delay(attempt);
        stats.total_delay += delay;
        warn!(
            attempt = attempt + 1,
            max_attempts,
            error = %error,
            delay = ?delay,
            "Request attempt failed, retrying"
        );

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn timeout() -> BridgeError {
        BridgeError::Timeout(Duration::from_millis(5))
    }

    #[test]
    fn test_delay_calculation_no_jitter() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(false);

        assert_eq!(config.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(config.calculate_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter(false);

        assert_eq!(config.calculate_delay(3), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_with_jitter() {
        let config = RetryConfig::new()
            .with_base_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(true);

        for _ in 0..20 {
            let delay = config.calculate_delay(0);
            assert!(
                delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3),
                "Delay {:?} should be between 1s and 3s",
                delay
            );
        }
    }

    #[tokio::test]
    async fn test_default_makes_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let (result, stats) = retry_async(&RetryConfig::default(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(timeout())
            }
        })
        .await;

        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert_eq!(stats.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(5))
            .with_jitter(false);

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let (result, stats) = retry_async(&config, || {
            let counter = counter_clone.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(timeout())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(stats.attempts, 3);
        assert!(stats.success);
        assert!(stats.total_delay >= Duration::from_millis(14));
    }

    #[tokio::test]
    async fn test_circuit_open_is_not_retried() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(5));

        let (result, stats) = retry_async(&config, || async {
            Err::<(), _>(BridgeError::CircuitOpen {
                endpoint: "tcp://localhost:1".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(BridgeError::CircuitOpen { .. })));
        assert_eq!(stats.attempts, 1);
        assert!(!stats.success);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_base_delay(Duration::from_millis(5))
            .with_jitter(false);

        let (result, stats) = retry_async(&config, || async { Err::<(), _>(timeout()) }).await;

        assert!(result.is_err());
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.last_error.as_deref(), Some("Request timed out after 5ms"));
    }
}
