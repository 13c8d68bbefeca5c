use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, Result};

/// Request-side control codes, sent forwarder -> listener.
pub mod request {
    pub const CREATE: u8 = b'0';
    pub const JOIN: u8 = b'1';
    pub const DELETE: u8 = b'2';
    pub const GENERATE_KEY: u8 = b'3';
    pub const REVOKE_KEY: u8 = b'4';
}

/// Response-side control codes, sent listener -> forwarder.
///
/// `FULL` is shared by two requests (`POOL_FULL` for JOIN, `UIMA_FULL` for
/// GENERATE_KEY) and always means "capacity exhausted", never an error.
/// `NOT_UIMA` is only ever sent for GENERATE_KEY/REVOKE_KEY against a
/// listener running in default (non-UIMA) mode. Callers must disambiguate
/// `FULL` by the request they sent, never by the response code alone.
pub mod response {
    pub const SUCCESS: u8 = b'0';
    pub const AUTH_ERROR: u8 = b'1';
    pub const NOT_UIMA: u8 = b'2';
    pub const FULL: u8 = b'3';
}

pub const CODE_LEN: usize = 1;
pub const KEY_LEN: usize = 43;
pub const MESSAGE_LEN: usize = 6;
pub const FRAME_LEN: usize = CODE_LEN + KEY_LEN + MESSAGE_LEN;

/// The fixed 50-byte `CODE | KEY | MESSAGE` control frame multiplexed onto
/// the listener's single accept port alongside plain HTTP traffic.
#[derive(Debug, Clone)]
pub struct ControlFrame {
    pub code: u8,
    pub key: [u8; KEY_LEN],
    pub message: [u8; MESSAGE_LEN],
}

impl ControlFrame {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            key: [0u8; KEY_LEN],
            message: [0u8; MESSAGE_LEN],
        }
    }

    pub fn with_key(mut self, key: &[u8]) -> Self {
        let n = key.len().min(KEY_LEN);
        self.key[..n].copy_from_slice(&key[..n]);
        self
    }

    pub fn with_message(mut self, message: &[u8]) -> Self {
        let n = message.len().min(MESSAGE_LEN);
        self.message[..n].copy_from_slice(&message[..n]);
        self
    }

    /// `key`, trimmed of trailing NUL padding and decoded as UTF-8 when
    /// possible. UIMA cipher payloads are not valid UTF-8 in general; use
    /// `key` directly for those.
    pub fn key_str(&self) -> String {
        trimmed_utf8(&self.key)
    }

    pub fn message_str(&self) -> String {
        trimmed_utf8(&self.message)
    }

    pub fn build(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = self.code;
        buf[CODE_LEN..CODE_LEN + KEY_LEN].copy_from_slice(&self.key);
        buf[CODE_LEN + KEY_LEN..].copy_from_slice(&self.message);
        buf
    }

    pub fn parse(buf: [u8; FRAME_LEN]) -> Self {
        let code = buf[0];
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&buf[CODE_LEN..CODE_LEN + KEY_LEN]);
        let mut message = [0u8; MESSAGE_LEN];
        message.copy_from_slice(&buf[CODE_LEN + KEY_LEN..]);
        Self { code, key, message }
    }

    /// Reads a full 50-byte frame, looping until every byte has arrived.
    /// The reference implementation trusts a single `read()` to return the
    /// whole frame; this reads fully instead (see REDESIGN FLAGS).
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; FRAME_LEN];
        read_fully(reader, &mut buf).await?;
        Ok(Self::parse(buf))
    }

    /// Reads the remaining `FRAME_LEN - 1` bytes of a frame whose first byte
    /// (`prefix`) has already been consumed off the wire by the dispatcher
    /// while discriminating control frames from HTTP traffic.
    pub async fn read_partial<R: AsyncRead + Unpin>(reader: &mut R, prefix: u8) -> Result<Self> {
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = prefix;
        read_fully(reader, &mut buf[1..]).await?;
        Ok(Self::parse(buf))
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.build()).await?;
        Ok(())
    }
}

fn trimmed_utf8(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

async fn read_fully<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(CodecError::IncompleteControlFrame);
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn build_pads_to_frame_len() {
        let frame = ControlFrame::new(request::CREATE).with_key(b"abc");
        let bytes = frame.build();
        assert_eq!(bytes.len(), FRAME_LEN);
        assert_eq!(bytes[0], b'0');
        assert_eq!(&bytes[1..4], b"abc");
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn parse_round_trips_build() {
        let frame = ControlFrame::new(request::JOIN)
            .with_key(b"session-id")
            .with_message(b"3");
        let parsed = ControlFrame::parse(frame.build());
        assert_eq!(parsed.code, request::JOIN);
        assert_eq!(parsed.key_str(), "session-id");
        assert_eq!(parsed.message_str(), "3");
    }

    #[tokio::test]
    async fn read_partial_reassembles_the_peeked_byte() {
        let (mut client, mut server) = duplex(64);
        let frame = ControlFrame::new(request::DELETE).with_key(b"sess");
        frame.write(&mut client).await.unwrap();

        let mut prefix = [0u8; 1];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut prefix)
            .await
            .unwrap();
        let parsed = ControlFrame::read_partial(&mut server, prefix[0])
            .await
            .unwrap();
        assert_eq!(parsed.code, request::DELETE);
        assert_eq!(parsed.key_str(), "sess");
    }

    #[tokio::test]
    async fn read_on_short_connection_errors() {
        let (client, mut server) = duplex(64);
        drop(client);
        let err = ControlFrame::read(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::IncompleteControlFrame));
    }
}
