//! API implementation submodules.
//!
//! Each submodule contains `impl SecureBridge` blocks that extend the public
//! API. The struct definition remains in `lib.rs`.

mod builder;
mod client;
mod server;

pub use builder::SecureBridgeBuilder;
