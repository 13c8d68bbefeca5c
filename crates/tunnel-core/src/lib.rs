//! Session, pool and authentication state machines shared by the tunnel
//! listener and forwarder. Wire framing lives in `tunnel-codec`; this crate
//! is where that framing gets routing, capacity and auth semantics.

pub mod auth;
pub mod client;
pub mod error;
pub mod forwarder;
pub mod listener;
mod relay;
pub mod session;

pub use auth::{sha256_b64url43, AuthAuthority, POOL_SIZE, TOKEN_LEN};
pub use error::{Result, TunnelError};
pub use forwarder::Forwarder;
pub use listener::Listener;
