//! Request side of the bridge.
//!
//! Every call goes through the endpoint's circuit breaker; an unreachable
//! peer therefore costs at most `minimum_requests` timeouts before calls
//! start failing fast.
//!
//! # Thread Safety
//!
//! A `REQ` socket allows one outstanding request. The client serializes
//! calls with a tokio `Mutex` held for the whole call, so it can be shared
//! between tasks.

use super::protocol::{RequestEnvelope, ResponseEnvelope};
use super::transport::{RequestTransport, ZmqRequestSocket};
use crate::codec::{Codec, WireFormat};
use crate::config::ClientConfig;
use crate::error::{BridgeError, Result};
use crate::keys::{KeyPair, PeerKey};
use crate::network::{retry_async, CircuitBreaker, CircuitBreakerConfig, RetryConfig};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Client endpoint bound to one server.
pub struct ClientEndpoint<T: RequestTransport = ZmqRequestSocket> {
    endpoint: String,
    codec: Codec,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    /// Held for the duration of a call.
    call_lock: Mutex<()>,
    /// Locked by the blocking thread for the length of one exchange. It stays
    /// in place when the calling future is dropped mid-exchange.
    transport: Arc<std::sync::Mutex<T>>,
}

impl ClientEndpoint<ZmqRequestSocket> {
    /// Open a CURVE `REQ` socket to the server at `config`.
    pub fn connect(
        context: &zmq::Context,
        config: &ClientConfig,
        keys: &KeyPair,
        server_key: &PeerKey,
    ) -> Result<Self> {
        let transport = ZmqRequestSocket::connect(context, config, keys, server_key)?;
        debug!(endpoint = %transport.endpoint(), "Client endpoint created");
        Ok(Self::with_transport(transport))
    }
}

impl<T: RequestTransport> ClientEndpoint<T> {
    /// Wrap an existing transport with default breaker and retry settings.
    pub fn with_transport(transport: T) -> Self {
        let endpoint = transport.endpoint().to_string();
        Self {
            breaker: CircuitBreaker::new(endpoint.clone()),
            endpoint,
            codec: Codec::new(),
            retry: RetryConfig::default(),
            call_lock: Mutex::new(()),
            transport: Arc::new(std::sync::Mutex::new(transport)),
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::with_config(self.endpoint.clone(), config);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Send `request` with its payload encoded in `format`.
    ///
    /// Errors are local failures (circuit open, timeout, transport, codec).
    /// An error reply from the server is returned as `Ok`.
    pub async fn send_request(
        &self,
        request: &RequestEnvelope,
        format: &WireFormat,
    ) -> Result<ResponseEnvelope> {
        let frame = request.seal(&self.codec, format)?.to_bytes()?;

        let _guard = self.call_lock.lock().await;
        let frame = &frame;
        let (reply, stats) = retry_async(&self.retry, move || {
            self.breaker.call(self.exchange(frame.clone()))
        })
        .await;
        if stats.attempts > 1 {
            debug!(endpoint = %self.endpoint, attempts = stats.attempts, "Request retried");
        }

        reply?.open(&self.codec)
    }

    /// Like [`send_request`](Self::send_request), but every local failure is
    /// turned into an error envelope.
    pub async fn invoke(&self, request: &RequestEnvelope, format: &WireFormat) -> ResponseEnvelope {
        match self.send_request(request, format).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    endpoint = %self.endpoint,
                    operation = %request.operation,
                    error = %e,
                    "Request failed"
                );
                ResponseEnvelope::from(&e)
            }
        }
    }

    /// Invoke `operation` with a JSON payload.
    pub async fn call(&self, operation: &str, token: &str, data: Value) -> ResponseEnvelope {
        self.invoke(&RequestEnvelope::new(operation, token, data), &WireFormat::Json)
            .await
    }

    /// One send/receive on a blocking thread; the reply must be a valid
    /// envelope.
    async fn exchange(&self, frame: Vec<u8>) -> Result<ResponseEnvelope> {
        let transport = self.transport.clone();

        let reply = tokio::task::spawn_blocking(move || {
            let mut transport = match transport.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    // A previous exchange panicked mid-flight; its socket
                    // state is unknown.
                    transport.clear_poison();
                    let mut guard = poisoned.into_inner();
                    guard.reset();
                    guard
                }
            };
            let result = transport.roundtrip(&frame);
            if result.is_err() {
                transport.reset();
            }
            result
        })
        .await
        .map_err(|e| BridgeError::TransportFailure {
            endpoint: self.endpoint.clone(),
            message: format!("exchange task failed: {}", e),
        })??;

        ResponseEnvelope::from_bytes(&reply)
    }
}

impl<T: RequestTransport> std::fmt::Debug for ClientEndpoint<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEndpoint")
            .field("endpoint", &self.endpoint)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::CircuitState;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Transport that answers from a closure and counts exchanges.
    struct FakeTransport {
        calls: Arc<AtomicU32>,
        resets: Arc<AtomicU32>,
        reply: Box<dyn FnMut(&[u8]) -> Result<Vec<u8>> + Send>,
    }

    impl RequestTransport for FakeTransport {
        fn endpoint(&self) -> &str {
            "tcp://fake:5555"
        }

        fn roundtrip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.reply)(request)
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fake(
        reply: impl FnMut(&[u8]) -> Result<Vec<u8>> + Send + 'static,
    ) -> (FakeTransport, Arc<AtomicU32>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let resets = Arc::new(AtomicU32::new(0));
        let transport = FakeTransport {
            calls: calls.clone(),
            resets: resets.clone(),
            reply: Box::new(reply),
        };
        (transport, calls, resets)
    }

    fn timeout(_: &[u8]) -> Result<Vec<u8>> {
        Err(BridgeError::Timeout(Duration::from_millis(10)))
    }

    fn echo_sum(request: &[u8]) -> Result<Vec<u8>> {
        let request = RequestEnvelope::from_bytes(request)?;
        let a = request.data["a"].as_i64().unwrap_or(0);
        let b = request.data["b"].as_i64().unwrap_or(0);
        ResponseEnvelope::success(json!({ "result": a + b })).to_bytes()
    }

    #[tokio::test]
    async fn test_successful_call() {
        let (transport, calls, _) = fake(echo_sum);
        let client = ClientEndpoint::with_transport(transport);

        let reply = client.call("sum", "tok", json!({"a": 2, "b": 3})).await;
        assert_eq!(reply, ResponseEnvelope::success(json!({"result": 5})));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_reply_is_not_a_breaker_failure() {
        let (transport, _, _) = fake(|_| ResponseEnvelope::error("Invalid JWT").to_bytes());
        let client = ClientEndpoint::with_transport(transport);

        for _ in 0..10 {
            let reply = client.call("sum", "bad", json!({})).await;
            assert_eq!(reply.message(), Some("Invalid JWT"));
        }
        assert_eq!(client.circuit_breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dead_peer_opens_circuit() {
        let (transport, calls, resets) = fake(timeout);
        let client = ClientEndpoint::with_transport(transport).with_circuit_breaker(
            CircuitBreakerConfig {
                reset_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        );

        for _ in 0..5 {
            let reply = client.call("sum", "tok", json!({})).await;
            assert_eq!(reply.message(), Some("Request timed out after 10ms"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(resets.load(Ordering::SeqCst), 5);

        let reply = client.call("sum", "tok", json!({})).await;
        assert_eq!(
            reply.message(),
            Some("Circuit breaker open for tcp://fake:5555")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // After the reset timeout one probe reaches the transport.
        tokio::time::sleep(Duration::from_millis(70)).await;
        let _ = client.call("sum", "tok", json!({})).await;
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(client.circuit_breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unparseable_reply_counts_as_failure() {
        let (transport, _, _) = fake(|_| Ok(b"<html>".to_vec()));
        let client = ClientEndpoint::with_transport(transport);

        let reply = client.call("sum", "tok", json!({})).await;
        assert!(reply.message().unwrap().starts_with("Malformed request:"));
        assert_eq!(client.circuit_breaker().stats().window_failures, 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_timeout() {
        let mut attempts = 0;
        let (transport, calls, _) = fake(move |request| {
            attempts += 1;
            if attempts == 1 {
                timeout(request)
            } else {
                echo_sum(request)
            }
        });
        let client = ClientEndpoint::with_transport(transport).with_retry(
            RetryConfig::new()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(5)),
        );

        let reply = client.call("sum", "tok", json!({"a": 1, "b": 1})).await;
        assert_eq!(reply, ResponseEnvelope::success(json!({"result": 2})));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_call_keeps_transport() {
        let mut first = true;
        let (transport, calls, _) = fake(move |request| {
            if std::mem::take(&mut first) {
                std::thread::sleep(Duration::from_millis(100));
            }
            echo_sum(request)
        });
        let client = ClientEndpoint::with_transport(transport);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            client.call("sum", "tok", json!({"a": 1, "b": 1})),
        )
        .await;
        assert!(cancelled.is_err());

        for i in 0..3i64 {
            let reply = client.call("sum", "tok", json!({"a": i, "b": 1})).await;
            assert_eq!(reply, ResponseEnvelope::success(json!({"result": i + 1})));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(client.circuit_breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_codec_error_skips_transport() {
        let (transport, calls, _) = fake(echo_sum);
        let client = ClientEndpoint::with_transport(transport);

        let request = RequestEnvelope::new("sum", "tok", json!({"a": 1}));
        let reply = client
            .invoke(&request, &WireFormat::protobuf("missing"))
            .await;
        assert!(reply.message().unwrap().starts_with("Schema mismatch"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.circuit_breaker().stats().window_requests, 0);
    }
}
