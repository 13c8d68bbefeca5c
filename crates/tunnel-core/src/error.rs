use thiserror::Error;

/// Errors raised by the session registry, auth authority, listener and
/// forwarder. Wire-level decoding errors live in [`tunnel_codec::CodecError`]
/// and are folded in here at the call boundary.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] tunnel_codec::CodecError),

    #[error("invalid auth token")]
    AuthInvalidToken,

    #[error("invalid auth cipher")]
    AuthInvalidCipher,

    #[error("unknown session")]
    UnknownSession,

    #[error("pool has no free connection")]
    PoolEmpty,

    #[error("pool is full")]
    PoolFull,

    #[error("listener is not running in UIMA mode")]
    NotUima,

    #[error("maximum number of UIMA tokens reached")]
    TooManyKeys,

    #[error("forwarder's session was rejected by the listener")]
    ForwarderAuthFatal,

    #[error("shutdown requested")]
    Shutdown,

    #[error("forwarder has not connected yet")]
    NotConnected,

    #[error("unexpected control response")]
    Protocol,

    #[error("cryptography error: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
