//! Builder for configuring a SecureBridge.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthConfig, AuthValidator};
use crate::codec::{Codec, MessageSchema};
use crate::config::{ClientConfig, ServerConfig};
use crate::error::Result;
use crate::ipc::ZapPolicy;
use crate::keys::{KeyPair, PeerKey};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::network::{CircuitBreakerConfig, RetryConfig};
use crate::registry::{HandlerRegistry, HandlerResult};
use crate::SecureBridge;

/// Builder for configuring a [`SecureBridge`].
///
/// # Example
///
/// ```rust,ignore
/// use secure_bridge::SecureBridge;
/// use serde_json::json;
///
/// let bridge = SecureBridge::builder()
///     .keys(server_keys)
///     .jwt_secret("shared-secret")
///     .server_port(5555)
///     .handler("sum", |data| {
///         let a = data["a"].as_i64().ok_or("missing 'a'")?;
///         let b = data["b"].as_i64().ok_or("missing 'b'")?;
///         Ok(json!({ "result": a + b }))
///     })
///     .build()?;
///
/// let server = bridge.start_server()?;
/// ```
pub struct SecureBridgeBuilder {
    context: Option<zmq::Context>,
    keys: Option<KeyPair>,
    peer_key: Option<PeerKey>,
    auth: Option<AuthConfig>,
    registry: HandlerRegistry,
    schemas: Vec<MessageSchema>,
    metrics: Option<Arc<dyn MetricsSink>>,
    server_config: ServerConfig,
    client_config: ClientConfig,
    breaker_config: CircuitBreakerConfig,
    retry_config: RetryConfig,
    zap_policy: Option<ZapPolicy>,
}

impl SecureBridgeBuilder {
    pub fn new() -> Self {
        Self {
            context: None,
            keys: None,
            peer_key: None,
            auth: None,
            registry: HandlerRegistry::new(),
            schemas: Vec::new(),
            metrics: None,
            server_config: ServerConfig::default(),
            client_config: ClientConfig::default(),
            breaker_config: CircuitBreakerConfig::default(),
            retry_config: RetryConfig::default(),
            zap_policy: None,
        }
    }

    /// Share a ZeroMQ context with other sockets in the process.
    ///
    /// Default: a fresh context.
    pub fn context(mut self, context: zmq::Context) -> Self {
        self.context = Some(context);
        self
    }

    /// This side's CURVE identity.
    ///
    /// Default: a freshly generated key pair.
    pub fn keys(mut self, keys: KeyPair) -> Self {
        self.keys = Some(keys);
        self
    }

    /// The server's public key. Required to connect a client.
    pub fn peer_key(mut self, key: PeerKey) -> Self {
        self.peer_key = Some(key);
        self
    }

    /// Verify tokens with `secret` using HS256. Required to serve.
    pub fn jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::new(secret));
        self
    }

    /// Full token verification settings. Required to serve.
    pub fn auth(mut self, config: AuthConfig) -> Self {
        self.auth = Some(config);
        self
    }

    /// Register an operation. Registering a name twice keeps the last handler.
    pub fn handler<F>(mut self, operation: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register(operation, handler);
        self
    }

    /// Use a pre-built registry, replacing handlers added so far.
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Make `schema` available to the schema-typed wire format.
    pub fn schema(mut self, schema: MessageSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    /// Where the server reports request metrics.
    ///
    /// Default: measurements are discarded.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Port the server binds. `0` picks an ephemeral port.
    pub fn server_port(mut self, port: u16) -> Self {
        self.server_config.port = port;
        self
    }

    /// Interface the server binds. Default: `*` (all interfaces).
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.server_config.bind_host = host.into();
        self
    }

    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.server_config = config;
        self
    }

    /// Host and port the client connects to.
    pub fn peer(mut self, host: impl Into<String>, port: u16) -> Self {
        self.client_config.host = host.into();
        self.client_config.port = port;
        self
    }

    /// Client timeout for one exchange.
    ///
    /// Default: `NetworkConfig::REQUEST_TIMEOUT` (5 s)
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.client_config.request_timeout = timeout;
        self
    }

    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Client retry policy. Default: one attempt, no retry.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Restrict which clients may connect to the server.
    pub fn zap_policy(mut self, policy: ZapPolicy) -> Self {
        self.zap_policy = Some(policy);
        self
    }

    /// Build the bridge. Schemas and the token secret are validated here.
    pub fn build(self) -> Result<SecureBridge> {
        let keys = match self.keys {
            Some(keys) => keys,
            None => KeyPair::generate()?,
        };

        let codec = self
            .schemas
            .into_iter()
            .try_fold(Codec::new(), |codec, schema| codec.with_schema(schema))?;

        if let Some(ref auth) = self.auth {
            AuthValidator::new(auth)?;
        }

        Ok(SecureBridge {
            context: self.context.unwrap_or_else(zmq::Context::new),
            keys,
            peer_key: self.peer_key,
            auth: self.auth,
            registry: Arc::new(self.registry),
            codec,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
            server_config: self.server_config,
            client_config: self.client_config,
            breaker_config: self.breaker_config,
            retry_config: self.retry_config,
            zap_policy: self.zap_policy,
        })
    }
}

impl Default for SecureBridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
