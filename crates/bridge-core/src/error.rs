//! Error types for the bridge.
//!
//! Every failure the bridge can observe is a variant of [`BridgeError`]. The
//! server turns these into error envelopes; the client turns them into tagged
//! error results. Nothing here ever crosses the wire except its `Display` text.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Authorization
    /// The bearer token failed verification. The wire text is fixed; the
    /// underlying reason is only logged.
    #[error("Invalid JWT")]
    InvalidToken {
        /// Why verification failed (signature, expiry, format...).
        reason: String,
    },

    // Dispatch
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Handler error in '{operation}': {message}")]
    Handler { operation: String, message: String },

    #[error("Handler panicked while processing '{operation}'")]
    HandlerPanic { operation: String },

    // Codec
    #[error("Unsupported serialization format: {0}")]
    UnsupportedFormat(String),

    #[error("Schema mismatch for '{schema}': {message}")]
    SchemaMismatch { schema: String, message: String },

    #[error("Malformed request: {0}")]
    MalformedMessage(String),

    // Resilience
    #[error("Circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    // Transport
    #[error("Transport failure at {endpoint}: {message}")]
    TransportFailure { endpoint: String, message: String },

    // Configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Serialization / IO plumbing
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Build a transport failure from a libzmq error.
    pub fn transport(endpoint: impl Into<String>, err: zmq::Error) -> Self {
        BridgeError::TransportFailure {
            endpoint: endpoint.into(),
            message: err.message().to_string(),
        }
    }

    /// Build a schema mismatch error.
    pub fn schema(schema: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::SchemaMismatch {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Stable label used in structured logs and the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::InvalidToken { .. } => "invalid_token",
            BridgeError::UnknownOperation(_) => "unknown_operation",
            BridgeError::Handler { .. } => "handler",
            BridgeError::HandlerPanic { .. } => "handler_panic",
            BridgeError::UnsupportedFormat(_) => "unsupported_format",
            BridgeError::SchemaMismatch { .. } => "schema_mismatch",
            BridgeError::MalformedMessage(_) => "malformed_message",
            BridgeError::CircuitOpen { .. } => "circuit_open",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::TransportFailure { .. } => "transport_failure",
            BridgeError::Config { .. } => "config",
            BridgeError::Json { .. } => "json",
            BridgeError::Io { .. } => "io",
        }
    }

    /// Check if this error should trigger a client retry.
    ///
    /// Only failures of the exchange itself qualify; a circuit that is open
    /// stays open until its reset timeout, so retrying it is pointless.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Timeout(_) | BridgeError::TransportFailure { .. }
        )
    }
}
