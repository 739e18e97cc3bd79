//! Calling operations on a remote bridge.

use crate::error::{BridgeError, Result};
use crate::ipc::ClientEndpoint;
use crate::SecureBridge;

impl SecureBridge {
    /// Connect a client to the configured peer.
    ///
    /// Requires the server's public key. Each call returns an independent
    /// endpoint with its own circuit breaker.
    pub fn connect_client(&self) -> Result<ClientEndpoint> {
        let peer_key = self.peer_key.as_ref().ok_or_else(|| BridgeError::Config {
            message: "The server's public key is required to connect".to_string(),
        })?;

        Ok(
            ClientEndpoint::connect(&self.context, &self.client_config, &self.keys, peer_key)?
                .with_codec(self.codec.clone())
                .with_circuit_breaker(self.breaker_config.clone())
                .with_retry(self.retry_config.clone()),
        )
    }
}
