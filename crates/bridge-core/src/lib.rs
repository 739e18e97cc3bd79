//! SecureBridge - encrypted, authenticated request/reply between two processes.
//!
//! One side serves named operations behind a ZeroMQ `REP` socket secured
//! with CURVE; every request carries a JWT that is verified before dispatch.
//! The other side calls those operations through a `REQ` socket guarded by a
//! circuit breaker, so an unreachable peer fails fast instead of stalling
//! every caller.
//!
//! Payloads are JSON by default; MessagePack and schema-typed protobuf are
//! available per call.
//!
//! # Example
//!
//! ```rust,ignore
//! use secure_bridge::{KeyPair, SecureBridge};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> secure_bridge::Result<()> {
//!     let server_keys = KeyPair::generate()?;
//!
//!     let server = SecureBridge::builder()
//!         .keys(server_keys.clone())
//!         .jwt_secret("shared-secret")
//!         .server_port(5555)
//!         .handler("echo", Ok)
//!         .build()?;
//!     let handle = server.start_server()?;
//!
//!     let client = SecureBridge::builder()
//!         .peer("localhost", 5555)
//!         .peer_key(server_keys.public_key)
//!         .build()?
//!         .connect_client()?;
//!
//!     let token = std::env::var("BRIDGE_TOKEN").unwrap_or_default();
//!     let reply = client.call("echo", &token, json!({"hello": "world"})).await;
//!     println!("{:?}", reply);
//!
//!     handle.stop().await
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod keys;
pub mod metrics;
pub mod network;
pub mod registry;

mod api;

// Re-export commonly used types
pub use auth::{AuthAlgorithm, AuthConfig, AuthValidator, Claims};
pub use codec::{Codec, FieldKind, FieldSpec, MessageSchema, WireFormat};
pub use config::{ClientConfig, ServerConfig};
pub use error::{BridgeError, Result};
pub use ipc::{
    ClientEndpoint, RequestEnvelope, RequestTransport, ResponseEnvelope, ServerEndpoint,
    ServerHandle, ZapPolicy,
};
pub use keys::{CurveKey, KeyFile, KeyPair, PeerKey};
pub use metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
pub use network::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
pub use registry::{Handler, HandlerError, HandlerRegistry, HandlerResult};

// Re-export builder from api module
pub use api::SecureBridgeBuilder;

use std::sync::Arc;

/// A configured bridge that can serve, call, or both.
///
/// Key material, the token secret and the handler table are fixed when the
/// bridge is built. Servers and clients created from it share them read-only.
pub struct SecureBridge {
    pub(crate) context: zmq::Context,
    pub(crate) keys: KeyPair,
    pub(crate) peer_key: Option<PeerKey>,
    pub(crate) auth: Option<AuthConfig>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) codec: Codec,
    pub(crate) metrics: Arc<dyn MetricsSink>,
    pub(crate) server_config: ServerConfig,
    pub(crate) client_config: ClientConfig,
    pub(crate) breaker_config: CircuitBreakerConfig,
    pub(crate) retry_config: RetryConfig,
    pub(crate) zap_policy: Option<ZapPolicy>,
}

impl SecureBridge {
    pub fn builder() -> SecureBridgeBuilder {
        SecureBridgeBuilder::new()
    }

    /// This side's key pair.
    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Z85 public key to hand to the other side.
    pub fn public_key_z85(&self) -> Result<String> {
        self.keys.public_z85()
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> Vec<String> {
        self.registry.operations()
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn context(&self) -> &zmq::Context {
        &self.context
    }
}

impl std::fmt::Debug for SecureBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureBridge")
            .field("keys", &self.keys)
            .field("peer_key", &self.peer_key)
            .field("auth", &self.auth)
            .field("operations", &self.registry.operations())
            .field("server", &self.server_config)
            .field("client", &self.client_config)
            .finish_non_exhaustive()
    }
}
