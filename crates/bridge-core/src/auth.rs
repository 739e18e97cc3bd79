//! Bearer token verification.
//!
//! Every inbound request carries an HMAC-signed JWT. The validator only
//! verifies; issuing tokens is somebody else's job. All failure reasons
//! collapse into [`BridgeError::InvalidToken`] so the peer learns nothing
//! beyond "Invalid JWT".

use crate::config::AuthDefaults;
use crate::error::{BridgeError, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// HMAC algorithms accepted for bridge tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl From<AuthAlgorithm> for Algorithm {
    fn from(alg: AuthAlgorithm) -> Self {
        match alg {
            AuthAlgorithm::HS256 => Algorithm::HS256,
            AuthAlgorithm::HS384 => Algorithm::HS384,
            AuthAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

/// Token verification settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// Shared HMAC secret.
    pub secret: String,
    pub algorithm: AuthAlgorithm,
    /// Seconds of clock skew tolerated on `exp`.
    pub leeway_secs: u64,
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any. When unset, `aud` is not checked.
    pub audience: Option<String>,
}

impl AuthConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: AuthAlgorithm::default(),
            leeway_secs: AuthDefaults::LEEWAY_SECS,
            issuer: None,
            audience: None,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("leeway_secs", &self.leeway_secs)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Claims of a verified token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub iss: Option<String>,
    /// Any other claims, kept as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Verifies bridge tokens against the shared secret.
pub struct AuthValidator {
    key: DecodingKey,
    validation: Validation,
}

impl AuthValidator {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(BridgeError::Config {
                message: "JWT secret must not be empty".to_string(),
            });
        }

        let mut validation = Validation::new(config.algorithm.into());
        validation.leeway = config.leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        Ok(Self {
            key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        })
    }

    /// Verify `token` and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        if token.is_empty() {
            return Err(BridgeError::InvalidToken {
                reason: "missing token".to_string(),
            });
        }

        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "JWT validation failed");
                BridgeError::InvalidToken {
                    reason: format!("{:?}", e.kind()),
                }
            })
    }
}

impl fmt::Debug for AuthValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthValidator")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}
