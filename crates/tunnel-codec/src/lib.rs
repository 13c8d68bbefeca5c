//! Wire-level codecs shared by the tunnel listener and forwarder.
//!
//! Two framings share a single TCP accept port: a fixed 50-byte control
//! frame (see [`control`]) and ordinary HTTP/1.1 request headers (see
//! [`http`]). Discrimination between the two happens one level up, by
//! peeking the first byte of a new connection.

pub mod control;
pub mod error;
pub mod http;

pub use control::ControlFrame;
pub use error::{CodecError, Result};
pub use http::HttpRequestHeader;
