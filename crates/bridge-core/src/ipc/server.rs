//! Reply side of the bridge.
//!
//! A single `REP` socket is served by one blocking task. Requests are
//! handled strictly one at a time: parse, verify the token, decode the
//! payload, dispatch, encode the result, reply. Any failure becomes an
//! error envelope; the loop itself only stops on shutdown.
//!
//! # Thread Safety
//!
//! The [`RequestProcessor`] is shared via `Arc` and holds only read-only
//! state: the verifier, the frozen registry and the codec.

use super::protocol::{RequestEnvelope, ResponseEnvelope};
use super::transport::{bind_server_socket, millis_i32};
use super::zap::{ZapAuthenticator, ZapPolicy};
use crate::auth::AuthValidator;
use crate::codec::{Codec, WireFormat};
use crate::config::{ServerConfig, TransportConfig};
use crate::error::{BridgeError, Result};
use crate::keys::KeyPair;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::registry::HandlerRegistry;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Operation label used when a request could not be parsed far enough to
/// know its operation.
const UNKNOWN_OPERATION: &str = "unknown";

/// Turns one received message into one reply.
pub struct RequestProcessor {
    auth: AuthValidator,
    registry: Arc<HandlerRegistry>,
    codec: Codec,
    metrics: Arc<dyn MetricsSink>,
}

impl RequestProcessor {
    pub fn new(auth: AuthValidator, registry: Arc<HandlerRegistry>, codec: Codec) -> Self {
        Self {
            auth,
            registry,
            codec,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Handle the frames of one message.
    pub fn process(&self, frames: &[Vec<u8>]) -> ResponseEnvelope {
        let started = Instant::now();

        let request = match frames {
            [frame] => RequestEnvelope::from_bytes(frame),
            _ => Err(BridgeError::MalformedMessage(format!(
                "expected 1 frame, got {}",
                frames.len()
            ))),
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => return self.fail(UNKNOWN_OPERATION, e),
        };

        let operation = request.operation.clone();
        match self.handle(request) {
            Ok(reply) => {
                self.metrics.record_success(&operation, started.elapsed());
                debug!(operation = %operation, elapsed = ?started.elapsed(), "Request handled");
                reply
            }
            Err(e) => self.fail(&operation, e),
        }
    }

    fn handle(&self, request: RequestEnvelope) -> Result<ResponseEnvelope> {
        self.auth.verify(&request.token)?;

        let format: WireFormat = match request.encoding.as_deref() {
            Some(name) => name.parse()?,
            None => WireFormat::Json,
        };
        let operation = request.operation.clone();
        let data = request.open(&self.codec)?;

        let result = self.dispatch(&operation, data)?;
        ResponseEnvelope::success(result).seal(&self.codec, &format)
    }

    fn dispatch(&self, operation: &str, data: Value) -> Result<Value> {
        catch_unwind(AssertUnwindSafe(|| self.registry.dispatch(operation, data))).unwrap_or_else(
            |_| {
                Err(BridgeError::HandlerPanic {
                    operation: operation.to_string(),
                })
            },
        )
    }

    fn fail(&self, operation: &str, err: BridgeError) -> ResponseEnvelope {
        match &err {
            BridgeError::InvalidToken { reason } => {
                warn!(operation = %operation, error = %err, reason = %reason, "Request rejected")
            }
            _ if is_rejection(&err) => {
                warn!(operation = %operation, error = %err, "Request rejected")
            }
            _ => error!(operation = %operation, error = %err, "Request failed"),
        }
        self.metrics.record_error(operation, err.kind());
        ResponseEnvelope::from(&err)
    }
}

/// Failures caused by what the peer sent before it was authorized. Logged at
/// warn so unauthenticated traffic cannot flood the error log.
fn is_rejection(err: &BridgeError) -> bool {
    matches!(
        err,
        BridgeError::InvalidToken { .. } | BridgeError::MalformedMessage(_)
    )
}

/// Server endpoint, configured but not yet bound.
pub struct ServerEndpoint {
    context: zmq::Context,
    config: ServerConfig,
    keys: KeyPair,
    processor: Arc<RequestProcessor>,
    zap_policy: Option<ZapPolicy>,
}

impl ServerEndpoint {
    pub fn new(
        context: zmq::Context,
        config: ServerConfig,
        keys: KeyPair,
        processor: RequestProcessor,
    ) -> Self {
        Self {
            context,
            config,
            keys,
            processor: Arc::new(processor),
            zap_policy: None,
        }
    }

    /// Enforce `policy` on connecting clients.
    pub fn with_zap_policy(mut self, policy: ZapPolicy) -> Self {
        self.zap_policy = Some(policy);
        self
    }

    /// Bind the socket and start serving on a blocking task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<ServerHandle> {
        let zap = match self.zap_policy {
            Some(policy) => Some(ZapAuthenticator::start(&self.context, policy)?),
            None => None,
        };
        let zap_domain = zap.as_ref().map(|_| TransportConfig::ZAP_DOMAIN);

        let bound = bind_server_socket(&self.context, &self.config, &self.keys, zap_domain)?;
        info!(endpoint = %bound.endpoint, operations = ?self.processor.registry().operations(), "Server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let endpoint = bound.endpoint.clone();
        let port = bound.port;
        let poll_ms = i64::from(millis_i32(self.config.poll_interval));
        let processor = self.processor;

        let task = tokio::task::spawn_blocking(move || {
            serve(bound.socket, &processor, shutdown_rx, poll_ms);
            // The ZAP handler outlives the socket it guards.
            drop(zap);
            info!(endpoint = %bound.endpoint, "Server stopped");
        });

        Ok(ServerHandle {
            port,
            endpoint,
            shutdown_tx,
            task: Some(task),
        })
    }
}

fn serve(
    socket: zmq::Socket,
    processor: &RequestProcessor,
    shutdown_rx: watch::Receiver<bool>,
    poll_ms: i64,
) {
    loop {
        if *shutdown_rx.borrow() || shutdown_rx.has_changed().is_err() {
            break;
        }

        match socket.poll(zmq::POLLIN, poll_ms) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(zmq::Error::ETERM) => break,
            Err(zmq::Error::EINTR) => continue,
            Err(e) => {
                error!(error = %e, "Poll failed");
                std::thread::sleep(std::time::Duration::from_millis(poll_ms.max(1) as u64));
                continue;
            }
        }

        let frames = match socket.recv_multipart(0) {
            Ok(frames) => frames,
            Err(zmq::Error::ETERM) => break,
            Err(e) => {
                error!(error = %e, "Receive failed");
                continue;
            }
        };

        let reply = processor.process(&frames);
        let bytes = reply.to_bytes().unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize reply");
            br#"{"status":"error","message":"Internal error"}"#.to_vec()
        });

        match socket.send(bytes, 0) {
            Ok(()) => {}
            Err(zmq::Error::ETERM) => break,
            Err(e) => error!(error = %e, "Send failed"),
        }
    }
}

/// Handle to a running server. Dropping it signals shutdown.
pub struct ServerHandle {
    port: u16,
    endpoint: String,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The bound port; useful when the server was started on port 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The bound endpoint, e.g. `tcp://0.0.0.0:5555`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ask the loop to stop. It exits within one poll interval.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the loop to exit.
    pub async fn join(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task.await.map_err(|e| BridgeError::TransportFailure {
                endpoint: self.endpoint.clone(),
                message: format!("server task failed: {}", e),
            }),
            None => Ok(()),
        }
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) -> Result<()> {
        self.shutdown();
        self.join().await
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
