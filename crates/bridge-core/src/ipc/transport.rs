//! ZeroMQ sockets with CURVE security.
//!
//! The client talks through the [`RequestTransport`] trait so the retry and
//! circuit breaker logic can be exercised without a live peer.

use crate::config::{ClientConfig, ServerConfig, TransportConfig};
use crate::error::{BridgeError, Result};
use crate::keys::{KeyPair, PeerKey};
use std::time::Duration;
use tracing::debug;

/// One blocking request/reply exchange with a peer.
///
/// Implementations are moved onto a blocking thread for each exchange.
pub trait RequestTransport: Send + 'static {
    /// Address of the peer, used in errors and logs.
    fn endpoint(&self) -> &str;

    /// Send `request` and wait for the single reply frame.
    fn roundtrip(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Discard connection state after a failed exchange.
    fn reset(&mut self);
}

/// Client-side `REQ` socket authenticated against the server's public key.
///
/// A `REQ` socket that missed its reply cannot send again, so the socket is
/// dropped on [`reset`](RequestTransport::reset) and recreated lazily.
pub struct ZmqRequestSocket {
    context: zmq::Context,
    endpoint: String,
    keys: KeyPair,
    server_key: PeerKey,
    timeout: Duration,
    socket: Option<zmq::Socket>,
}

impl ZmqRequestSocket {
    pub fn connect(
        context: &zmq::Context,
        config: &ClientConfig,
        keys: &KeyPair,
        server_key: &PeerKey,
    ) -> Result<Self> {
        let mut transport = Self {
            context: context.clone(),
            endpoint: config.connect_address(),
            keys: keys.clone(),
            server_key: *server_key,
            timeout: config.request_timeout,
            socket: None,
        };
        transport.socket = Some(transport.open_socket()?);
        Ok(transport)
    }

    fn open_socket(&self) -> Result<zmq::Socket> {
        let err = |e| BridgeError::transport(&self.endpoint, e);
        let timeout_ms = millis_i32(self.timeout);

        let socket = self.context.socket(zmq::REQ).map_err(err)?;
        socket
            .set_curve_secretkey(self.keys.secret_key.as_bytes())
            .map_err(err)?;
        socket
            .set_curve_publickey(self.keys.public_key.as_bytes())
            .map_err(err)?;
        socket
            .set_curve_serverkey(self.server_key.as_bytes())
            .map_err(err)?;
        socket
            .set_linger(millis_i32(TransportConfig::LINGER))
            .map_err(err)?;
        socket.set_sndtimeo(timeout_ms).map_err(err)?;
        socket.set_rcvtimeo(timeout_ms).map_err(err)?;
        socket.connect(&self.endpoint).map_err(err)?;

        debug!(endpoint = %self.endpoint, "REQ socket connected");
        Ok(socket)
    }

    fn map_exchange_error(&self, e: zmq::Error) -> BridgeError {
        match e {
            zmq::Error::EAGAIN => BridgeError::Timeout(self.timeout),
            other => BridgeError::transport(&self.endpoint, other),
        }
    }
}

impl RequestTransport for ZmqRequestSocket {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn roundtrip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if self.socket.is_none() {
            self.socket = Some(self.open_socket()?);
        }
        let Some(socket) = self.socket.as_ref() else {
            return Err(BridgeError::TransportFailure {
                endpoint: self.endpoint.clone(),
                message: "socket unavailable".to_string(),
            });
        };

        socket
            .send(request, 0)
            .map_err(|e| self.map_exchange_error(e))?;
        let reply = socket
            .recv_bytes(0)
            .map_err(|e| self.map_exchange_error(e))?;

        if socket.get_rcvmore().unwrap_or(false) {
            // Drain the rest so the socket can send again.
            while let Ok(true) = socket.recv_bytes(0).and_then(|_| socket.get_rcvmore()) {}
            return Err(BridgeError::MalformedMessage(
                "reply had more than one frame".to_string(),
            ));
        }
        Ok(reply)
    }

    fn reset(&mut self) {
        if self.socket.take().is_some() {
            debug!(endpoint = %self.endpoint, "Discarded REQ socket after failed exchange");
        }
    }
}

impl std::fmt::Debug for ZmqRequestSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZmqRequestSocket")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("connected", &self.socket.is_some())
            .finish()
    }
}

/// A bound server socket and the address it ended up on.
pub(crate) struct BoundSocket {
    pub socket: zmq::Socket,
    pub endpoint: String,
    pub port: u16,
}

/// Bind a CURVE server `REP` socket.
pub(crate) fn bind_server_socket(
    context: &zmq::Context,
    config: &ServerConfig,
    keys: &KeyPair,
    zap_domain: Option<&str>,
) -> Result<BoundSocket> {
    let address = config.bind_address();
    let err = |e| BridgeError::transport(&address, e);

    let socket = context.socket(zmq::REP).map_err(err)?;
    if let Some(domain) = zap_domain {
        socket.set_zap_domain(domain).map_err(err)?;
    }
    socket.set_curve_server(true).map_err(err)?;
    socket
        .set_curve_secretkey(keys.secret_key.as_bytes())
        .map_err(err)?;
    socket
        .set_curve_publickey(keys.public_key.as_bytes())
        .map_err(err)?;
    socket
        .set_linger(millis_i32(TransportConfig::LINGER))
        .map_err(err)?;
    socket.bind(&address).map_err(err)?;

    let endpoint = socket
        .get_last_endpoint()
        .map_err(err)?
        .map_err(|_| BridgeError::TransportFailure {
            endpoint: address.clone(),
            message: "bound endpoint is not UTF-8".to_string(),
        })?;
    let port = endpoint_port(&endpoint).ok_or_else(|| BridgeError::TransportFailure {
        endpoint: endpoint.clone(),
        message: "could not determine bound port".to_string(),
    })?;

    Ok(BoundSocket {
        socket,
        endpoint,
        port,
    })
}

/// Port of a `tcp://host:port` endpoint.
fn endpoint_port(endpoint: &str) -> Option<u16> {
    endpoint.rsplit_once(':')?.1.parse().ok()
}

pub(crate) fn millis_i32(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}
