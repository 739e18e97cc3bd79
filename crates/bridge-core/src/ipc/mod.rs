//! ZeroMQ request/reply plumbing.
//!
//! # Architecture
//!
//! - **Server**: binds a CURVE `REP` socket and answers requests one at a time
//! - **Client**: connects a CURVE `REQ` socket, guarded by a circuit breaker
//! - **Protocol**: JSON envelopes shared by both
//! - **Transport**: socket setup and the client's exchange seam
//! - **ZAP**: optional allow lists checked when clients connect

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod zap;

pub use client::ClientEndpoint;
pub use protocol::{RequestEnvelope, ResponseEnvelope};
pub use server::{RequestProcessor, ServerEndpoint, ServerHandle};
pub use transport::{RequestTransport, ZmqRequestSocket};
pub use zap::{ZapAuthenticator, ZapPolicy};
