//! Serving operations.

use crate::auth::AuthValidator;
use crate::error::{BridgeError, Result};
use crate::ipc::{RequestProcessor, ServerEndpoint, ServerHandle};
use crate::SecureBridge;
use tracing::info;

impl SecureBridge {
    /// Bind the server socket and start answering requests.
    ///
    /// Requires a token secret. Must be called from within a tokio runtime.
    pub fn start_server(&self) -> Result<ServerHandle> {
        let auth = self.auth.as_ref().ok_or_else(|| BridgeError::Config {
            message: "A JWT secret is required to start the server".to_string(),
        })?;

        let processor = RequestProcessor::new(
            AuthValidator::new(auth)?,
            self.registry.clone(),
            self.codec.clone(),
        )
        .with_metrics(self.metrics.clone());

        let mut endpoint = ServerEndpoint::new(
            self.context.clone(),
            self.server_config.clone(),
            self.keys.clone(),
            processor,
        );
        if let Some(ref policy) = self.zap_policy {
            info!(
                addresses = policy.allowed_addresses.len(),
                client_keys = policy.allowed_client_keys.len(),
                "ZAP access policy enabled"
            );
            endpoint = endpoint.with_zap_policy(policy.clone());
        }

        endpoint.start()
    }
}
