//! Request metrics.
//!
//! The server reports every handled request through a [`MetricsSink`]. The
//! bridge ships a no-op sink and a Prometheus sink; exposing the Prometheus
//! text over HTTP is left to the application.

use crate::error::{BridgeError, Result};
use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Receiver of per-request measurements.
pub trait MetricsSink: Send + Sync {
    /// A request for `operation` completed successfully after `latency`.
    fn record_success(&self, operation: &str, latency: Duration);

    /// A request for `operation` failed; `kind` is [`BridgeError::kind`].
    fn record_error(&self, operation: &str, kind: &str);
}

/// Discards all measurements.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_success(&self, _operation: &str, _latency: Duration) {}
    fn record_error(&self, _operation: &str, _kind: &str) {}
}

/// Prometheus-backed metrics with its own registry.
///
/// - `bridge_requests_total{operation}`
/// - `bridge_request_latency_seconds{operation}`
/// - `bridge_request_errors_total{kind}`
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    requests: IntCounterVec,
    latency: HistogramVec,
    errors: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("bridge_requests_total", "Requests handled, by operation"),
            &["operation"],
        )
        .map_err(metrics_error)?;

        let latency = HistogramVec::new(
            HistogramOpts::new(
                "bridge_request_latency_seconds",
                "Time spent handling successful requests",
            )
            .buckets(exponential_buckets(0.0005, 2.0, 14).map_err(metrics_error)?),
            &["operation"],
        )
        .map_err(metrics_error)?;

        let errors = IntCounterVec::new(
            Opts::new("bridge_request_errors_total", "Failed requests, by error kind"),
            &["kind"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(requests.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(latency.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(errors.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            requests,
            latency,
            errors,
        })
    }

    /// The underlying registry, for callers that add their own collectors.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all metrics in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(metrics_error)
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_success(&self, operation: &str, latency: Duration) {
        self.requests.with_label_values(&[operation]).inc();
        self.latency
            .with_label_values(&[operation])
            .observe(latency.as_secs_f64());
    }

    fn record_error(&self, operation: &str, kind: &str) {
        self.requests.with_label_values(&[operation]).inc();
        self.errors.with_label_values(&[kind]).inc();
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

fn metrics_error(err: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config {
        message: format!("Metrics error: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_values() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_success("sum", Duration::from_millis(3));
        metrics.record_success("sum", Duration::from_millis(4));
        metrics.record_error("divide", "unknown_operation");

        let text = metrics.render().unwrap();
        assert!(text.contains("bridge_requests_total{operation=\"sum\"} 2"));
        assert!(text.contains("bridge_requests_total{operation=\"divide\"} 1"));
        assert!(text.contains("bridge_request_errors_total{kind=\"unknown_operation\"} 1"));
        assert!(text.contains("bridge_request_latency_seconds_count{operation=\"sum\"} 2"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();
        a.record_error("x", "timeout");

        assert!(a.render().unwrap().contains("bridge_request_errors_total"));
        assert!(!b.render().unwrap().contains("kind=\"timeout\""));
    }

    #[test]
    fn test_noop_accepts_everything() {
        let sink: &dyn MetricsSink = &NoopMetrics;
        sink.record_success("sum", Duration::ZERO);
        sink.record_error("sum", "handler");
    }
}
