//! Centralized configuration for the bridge.
//!
//! Constants are grouped by concern the same way runtime settings are:
//! transport, network resilience and token verification. The runtime
//! structs (`ServerConfig`, `ClientConfig`) take their defaults from here.

use std::time::Duration;

/// Transport-level constants.
pub struct TransportConfig;

impl TransportConfig {
    /// Host used in the server bind address (`tcp://*:<port>`).
    pub const BIND_HOST: &'static str = "*";
    /// Host the client connects to when none is configured.
    pub const DEFAULT_PEER_HOST: &'static str = "localhost";
    /// How often the blocking receive loop wakes up to check for shutdown.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Linger on close; pending messages to a dead peer are dropped.
    pub const LINGER: Duration = Duration::ZERO;
    /// Well-known endpoint of the ZAP handler inside a context.
    pub const ZAP_ENDPOINT: &'static str = "inproc://zeromq.zap.01";
    /// ZAP domain the server socket announces.
    pub const ZAP_DOMAIN: &'static str = "secure-bridge";
}

/// Network resilience constants for the client side.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Per-call timeout for the request/reply exchange.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    pub const CIRCUIT_BREAKER_ERROR_THRESHOLD_PERCENTAGE: u32 = 50;
    pub const CIRCUIT_BREAKER_MINIMUM_REQUESTS: usize = 5;
    pub const CIRCUIT_BREAKER_ROLLING_WINDOW: Duration = Duration::from_secs(10);
    pub const CIRCUIT_BREAKER_RESET_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Token verification defaults.
pub struct AuthDefaults;

impl AuthDefaults {
    /// Clock skew tolerated when checking `exp`.
    pub const LEEWAY_SECS: u64 = 0;
}

/// Settings for the reply side of the bridge.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host part of the bind address; `*` binds every interface.
    pub bind_host: String,
    /// Port to bind. `0` asks for an ephemeral port.
    pub port: u16,
    /// Receive loop wake-up interval.
    pub poll_interval: Duration,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// The ZeroMQ bind address, e.g. `tcp://*:5555`.
    pub fn bind_address(&self) -> String {
        if self.port == 0 {
            format!("tcp://{}:*", self.bind_host)
        } else {
            format!("tcp://{}:{}", self.bind_host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: TransportConfig::BIND_HOST.to_string(),
            port: 0,
            poll_interval: TransportConfig::POLL_INTERVAL,
        }
    }
}

/// Settings for the request side of the bridge.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Timeout for one send/receive exchange.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
        }
    }

    /// The ZeroMQ connect address, e.g. `tcp://localhost:5555`.
    pub fn connect_address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(TransportConfig::DEFAULT_PEER_HOST, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        assert_eq!(ServerConfig::new(5555).bind_address(), "tcp://*:5555");
        assert_eq!(ServerConfig::new(0).bind_address(), "tcp://*:*");
    }

    #[test]
    fn test_connect_address() {
        assert_eq!(
            ClientConfig::new("localhost", 5556).connect_address(),
            "tcp://localhost:5556"
        );
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(NetworkConfig::REQUEST_TIMEOUT > Duration::ZERO);
        assert!(
            NetworkConfig::CIRCUIT_BREAKER_RESET_TIMEOUT > NetworkConfig::REQUEST_TIMEOUT
        );
        assert!(TransportConfig::POLL_INTERVAL < NetworkConfig::REQUEST_TIMEOUT);
    }
}
