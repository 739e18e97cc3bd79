//! ZAP access policy for the server socket.
//!
//! libzmq asks a ZAP handler (a `REP` socket bound at
//! `inproc://zeromq.zap.01` in the same context) whether each new peer may
//! connect. CURVE has already proved the client owns its key by then; the
//! policy only decides whether that address and key are welcome.

use crate::config::TransportConfig;
use crate::error::{BridgeError, Result};
use crate::keys::CurveKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

const ZAP_VERSION: &[u8] = b"1.0";

/// Which clients may connect. Empty lists allow everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZapPolicy {
    /// Allowed peer IP addresses, as reported by libzmq.
    pub allowed_addresses: Vec<String>,
    /// Allowed client public keys.
    pub allowed_client_keys: Vec<CurveKey>,
}

impl ZapPolicy {
    /// Accept any CURVE client.
    pub fn allow_any() -> Self {
        Self::default()
    }

    pub fn allow_address(mut self, address: impl Into<String>) -> Self {
        self.allowed_addresses.push(address.into());
        self
    }

    pub fn allow_client_key(mut self, key: CurveKey) -> Self {
        self.allowed_client_keys.push(key);
        self
    }

    fn check(&self, address: &str, mechanism: &[u8], client_key: Option<&[u8]>) -> std::result::Result<(), &'static str> {
        if mechanism != b"CURVE" {
            return Err("CURVE required");
        }
        if !self.allowed_addresses.is_empty()
            && !self.allowed_addresses.iter().any(|a| a == address)
        {
            return Err("Address not allowed");
        }
        if !self.allowed_client_keys.is_empty() {
            let allowed = client_key.is_some_and(|key| {
                self.allowed_client_keys
                    .iter()
                    .any(|k| k.as_bytes().as_slice() == key)
            });
            if !allowed {
                return Err("Client key not allowed");
            }
        }
        Ok(())
    }
}

/// Build the reply frames for one ZAP request.
///
/// Request frames: version, request id, domain, address, identity,
/// mechanism, then mechanism credentials (the client public key for CURVE).
pub fn respond(policy: &ZapPolicy, request: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let request_id = request.get(1).cloned().unwrap_or_default();

    if request.len() < 6 || request[0] != ZAP_VERSION {
        return reply(request_id, "400", "Malformed ZAP request");
    }

    let address = String::from_utf8_lossy(&request[3]);
    let mechanism = &request[5];
    let client_key = request.get(6).map(Vec::as_slice);

    match policy.check(&address, mechanism, client_key) {
        Ok(()) => {
            debug!(address = %address, "ZAP accepted client");
            reply(request_id, "200", "OK")
        }
        Err(reason) => {
            warn!(address = %address, reason, "ZAP denied client");
            reply(request_id, "400", reason)
        }
    }
}

fn reply(request_id: Vec<u8>, code: &str, text: &str) -> Vec<Vec<u8>> {
    vec![
        ZAP_VERSION.to_vec(),
        request_id,
        code.as_bytes().to_vec(),
        text.as_bytes().to_vec(),
        Vec::new(),
        Vec::new(),
    ]
}

/// A running ZAP handler thread. Dropping it stops the thread.
pub struct ZapAuthenticator {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ZapAuthenticator {
    /// Bind the ZAP endpoint in `context` and answer requests with `policy`.
    ///
    /// Must run before any server socket in the same context binds.
    pub fn start(context: &zmq::Context, policy: ZapPolicy) -> Result<Self> {
        let endpoint = TransportConfig::ZAP_ENDPOINT;
        let socket = context
            .socket(zmq::REP)
            .map_err(|e| BridgeError::transport(endpoint, e))?;
        socket
            .set_linger(0)
            .map_err(|e| BridgeError::transport(endpoint, e))?;
        socket
            .bind(endpoint)
            .map_err(|e| BridgeError::transport(endpoint, e))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let poll_ms = TransportConfig::POLL_INTERVAL.as_millis() as i64;

        let thread = std::thread::Builder::new()
            .name("zap-handler".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    match socket.poll(zmq::POLLIN, poll_ms) {
                        Ok(0) => continue,
                        Ok(_) => {}
                        Err(zmq::Error::ETERM) => break,
                        Err(zmq::Error::EINTR) => continue,
                        Err(e) => {
                            error!(error = %e, "ZAP poll failed");
                            break;
                        }
                    }

                    let request = match socket.recv_multipart(0) {
                        Ok(frames) => frames,
                        Err(zmq::Error::ETERM) => break,
                        Err(e) => {
                            error!(error = %e, "ZAP receive failed");
                            continue;
                        }
                    };
                    if let Err(e) = socket.send_multipart(respond(&policy, &request), 0) {
                        error!(error = %e, "ZAP reply failed");
                    }
                }
                debug!("ZAP handler stopped");
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("ZAP handler thread panicked");
            }
        }
    }
}

impl Drop for ZapAuthenticator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    fn request(address: &str, mechanism: &str, key: Option<&CurveKey>) -> Vec<Vec<u8>> {
        let mut frames = vec![
            b"1.0".to_vec(),
            b"7".to_vec(),
            b"secure-bridge".to_vec(),
            address.as_bytes().to_vec(),
            Vec::new(),
            mechanism.as_bytes().to_vec(),
        ];
        if let Some(key) = key {
            frames.push(key.as_bytes().to_vec());
        }
        frames
    }

    fn status(reply: &[Vec<u8>]) -> &[u8] {
        &reply[2]
    }

    #[test]
    fn test_allow_any() {
        let key = KeyPair::generate().unwrap().public_key;
        let reply = respond(&ZapPolicy::allow_any(), &request("10.0.0.1", "CURVE", Some(&key)));
        assert_eq!(reply.len(), 6);
        assert_eq!(reply[1], b"7");
        assert_eq!(status(&reply), b"200");
    }

    #[test]
    fn test_address_allow_list() {
        let policy = ZapPolicy::default().allow_address("127.0.0.1");
        let key = KeyPair::generate().unwrap().public_key;

        assert_eq!(status(&respond(&policy, &request("127.0.0.1", "CURVE", Some(&key)))), b"200");
        assert_eq!(status(&respond(&policy, &request("10.1.2.3", "CURVE", Some(&key)))), b"400");
    }

    #[test]
    fn test_client_key_allow_list() {
        let known = KeyPair::generate().unwrap().public_key;
        let stranger = KeyPair::generate().unwrap().public_key;
        let policy = ZapPolicy::default().allow_client_key(known);

        assert_eq!(status(&respond(&policy, &request("127.0.0.1", "CURVE", Some(&known)))), b"200");
        assert_eq!(status(&respond(&policy, &request("127.0.0.1", "CURVE", Some(&stranger)))), b"400");
        assert_eq!(status(&respond(&policy, &request("127.0.0.1", "CURVE", None))), b"400");
    }

    #[test]
    fn test_non_curve_and_malformed() {
        let policy = ZapPolicy::allow_any();
        assert_eq!(status(&respond(&policy, &request("127.0.0.1", "NULL", None))), b"400");

        let reply = respond(&policy, &[b"2.0".to_vec(), b"1".to_vec()]);
        assert_eq!(status(&reply), b"400");
        assert_eq!(reply[1], b"1");
    }

    #[test]
    fn test_authenticator_starts_and_stops() {
        let context = zmq::Context::new();
        let mut zap = ZapAuthenticator::start(&context, ZapPolicy::allow_any()).unwrap();
        zap.stop();
        assert!(zap.thread.is_none());
    }
}
