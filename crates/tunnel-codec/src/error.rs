use thiserror::Error;

/// Errors raised while decoding bytes off the wire.
///
/// This is deliberately narrow: the codec layer only ever fails on short
/// reads or malformed framing, never on semantic validation (auth, routing,
/// capacity) — those live in `tunnel-core`.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connection closed before a full control frame was read")]
    IncompleteControlFrame,

    #[error("connection closed before a full header line was read")]
    IncompleteHeaderLine,

    #[error("http request line has fewer than three whitespace-separated tokens")]
    InvalidHeaderStart,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
