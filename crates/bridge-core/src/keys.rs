//! CURVE key material.
//!
//! Keys are 32 raw bytes; their textual form is Z85 (40 characters), which is
//! what key files and the CLI exchange. Nothing in this module performs
//! cryptography: generation and encoding are delegated to libzmq.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Length of a raw CURVE key in bytes.
pub const CURVE_KEY_LEN: usize = 32;

/// A 32-byte CURVE key (public or secret).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurveKey([u8; CURVE_KEY_LEN]);

/// The remote party's public key.
pub type PeerKey = CurveKey;

impl CurveKey {
    pub fn from_bytes(bytes: [u8; CURVE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CURVE_KEY_LEN] {
        &self.0
    }

    /// Parse a Z85-encoded key.
    pub fn from_z85(text: &str) -> Result<Self> {
        let bytes = zmq::z85_decode(text.trim()).map_err(|e| BridgeError::Config {
            message: format!("Invalid Z85 key: {:?}", e),
        })?;
        Self::try_from(bytes.as_slice())
    }

    /// Z85 text form of the key.
    pub fn to_z85(&self) -> Result<String> {
        zmq::z85_encode(&self.0).map_err(|e| BridgeError::Config {
            message: format!("Failed to Z85-encode key: {:?}", e),
        })
    }
}

impl TryFrom<&[u8]> for CurveKey {
    type Error = BridgeError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; CURVE_KEY_LEN] = bytes.try_into().map_err(|_| BridgeError::Config {
            message: format!(
                "CURVE key must be {} bytes, got {}",
                CURVE_KEY_LEN,
                bytes.len()
            ),
        })?;
        Ok(Self(raw))
    }
}

impl FromStr for CurveKey {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_z85(s)
    }
}

impl fmt::Debug for CurveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_z85() {
            Ok(text) => write!(f, "CurveKey({})", text),
            Err(_) => write!(f, "CurveKey(<{} bytes>)", CURVE_KEY_LEN),
        }
    }
}

/// A local CURVE identity.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: CurveKey,
    pub secret_key: CurveKey,
}

impl KeyPair {
    pub fn new(public_key: CurveKey, secret_key: CurveKey) -> Self {
        Self {
            public_key,
            secret_key,
        }
    }

    /// Generate a fresh key pair with libzmq.
    pub fn generate() -> Result<Self> {
        let pair = zmq::CurveKeyPair::new().map_err(|e| BridgeError::Config {
            message: format!("CURVE key generation failed: {}", e.message()),
        })?;
        Ok(Self {
            public_key: CurveKey(pair.public_key),
            secret_key: CurveKey(pair.secret_key),
        })
    }

    /// Build a key pair from Z85 text.
    pub fn from_z85(public_key: &str, secret_key: &str) -> Result<Self> {
        Ok(Self {
            public_key: CurveKey::from_z85(public_key)?,
            secret_key: CurveKey::from_z85(secret_key)?,
        })
    }

    /// Z85 text of the public half, safe to print and share.
    pub fn public_z85(&self) -> Result<String> {
        self.public_key.to_z85()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// One identity inside a key file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFileEntry {
    /// Z85 secret key; absent for peers whose public key is all we know.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub public: String,
}

/// JSON key file mapping identity names to Z85 keys:
///
/// ```json
/// { "server": { "secret": "...", "public": "..." } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFile {
    identities: BTreeMap<String, KeyFileEntry>,
}

impl KeyFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| BridgeError::Io {
            message: format!("Failed to read key file {}: {}", path.display(), e),
            source: Some(e),
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| BridgeError::Io {
            message: format!("Failed to write key file {}: {}", path.display(), e),
            source: Some(e),
        })
    }

    /// Store a full identity under `name`.
    pub fn insert(&mut self, name: impl Into<String>, pair: &KeyPair) -> Result<()> {
        let entry = KeyFileEntry {
            secret: Some(pair.secret_key.to_z85()?),
            public: pair.public_key.to_z85()?,
        };
        self.identities.insert(name.into(), entry);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    /// The full key pair for `name`; fails if the secret half is missing.
    pub fn key_pair(&self, name: &str) -> Result<KeyPair> {
        let entry = self.entry(name)?;
        let secret = entry.secret.as_deref().ok_or_else(|| BridgeError::Config {
            message: format!("Identity '{}' has no secret key", name),
        })?;
        KeyPair::from_z85(&entry.public, secret)
    }

    /// Only the public key of `name`, as used for a peer.
    pub fn public_key(&self, name: &str) -> Result<PeerKey> {
        CurveKey::from_z85(&self.entry(name)?.public)
    }

    fn entry(&self, name: &str) -> Result<&KeyFileEntry> {
        self.identities.get(name).ok_or_else(|| BridgeError::Config {
            message: format!("Identity '{}' not found in key file", name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_keys_survive_z85() {
        let pair = KeyPair::generate().unwrap();
        let public = pair.public_key.to_z85().unwrap();
        let secret = pair.secret_key.to_z85().unwrap();
        assert_eq!(public.len(), 40);

        let parsed = KeyPair::from_z85(&public, &secret).unwrap();
        assert_eq!(parsed, pair);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = CurveKey::try_from(&[0u8; 16][..]).unwrap_err();
        assert!(matches!(err, BridgeError::Config { .. }));
        assert!(CurveKey::from_z85("not a key").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let pair = KeyPair::generate().unwrap();
        let secret = pair.secret_key.to_z85().unwrap();
        let printed = format!("{:?}", pair);
        assert!(!printed.contains(&secret));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_key_file_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys").join("keys.json");

        let server = KeyPair::generate().unwrap();
        let client = KeyPair::generate().unwrap();
        let mut file = KeyFile::new();
        file.insert("server", &server).unwrap();
        file.insert("client", &client).unwrap();
        file.save(&path).unwrap();

        let loaded = KeyFile::load(&path).unwrap();
        assert_eq!(loaded.names().collect::<Vec<_>>(), vec!["client", "server"]);
        assert_eq!(loaded.key_pair("server").unwrap(), server);
        assert_eq!(loaded.public_key("client").unwrap(), client.public_key);
    }

    #[test]
    fn test_key_file_public_only_identity() {
        let pair = KeyPair::generate().unwrap();
        let json = format!(
            r#"{{"peer": {{"public": "{}"}}}}"#,
            pair.public_key.to_z85().unwrap()
        );
        let file: KeyFile = serde_json::from_str(&json).unwrap();

        assert_eq!(file.public_key("peer").unwrap(), pair.public_key);
        assert!(file.key_pair("peer").is_err());
        assert!(file.public_key("missing").is_err());
    }
}
