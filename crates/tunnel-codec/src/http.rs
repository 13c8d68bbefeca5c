use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, Result};

const LINE_SEP: &[u8] = b"\r\n";

/// An in-memory parse of an HTTP/1.1 request's start line and headers.
///
/// `buffer` preserves the exact bytes read off the wire (casing, header
/// order, idiosyncrasies and all) so the relay can forward it byte-for-byte
/// rather than a rebuilt approximation.
#[derive(Debug, Clone, Default)]
pub struct HttpRequestHeader {
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub headers: HashMap<String, String>,
    pub buffer: Vec<u8>,
}

impl HttpRequestHeader {
    /// Reads one request header from `reader`. `prefix` is the byte the
    /// dispatcher already consumed off the wire while discriminating this
    /// connection as HTTP rather than a control frame; when present it is
    /// prepended to the request line before re-assembly.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R, prefix: Option<u8>) -> Result<Self> {
        let mut header = Self::default();

        let mut first_line = Vec::new();
        if let Some(byte) = prefix {
            first_line.push(byte);
        }
        read_header_line(reader, &mut first_line).await?;
        header.buffer.extend_from_slice(&first_line);
        header.buffer.extend_from_slice(LINE_SEP);

        let text = String::from_utf8_lossy(&first_line);
        let tokens: Vec<&str> = text.splitn(3, ' ').collect();
        if tokens.len() < 3 {
            return Err(CodecError::InvalidHeaderStart);
        }
        header.method = tokens[0].to_string();
        header.path = tokens[1].to_string();
        header.protocol = tokens[2].to_string();

        loop {
            let mut line = Vec::new();
            read_header_line(reader, &mut line).await?;
            header.buffer.extend_from_slice(&line);
            header.buffer.extend_from_slice(LINE_SEP);
            if line.is_empty() {
                break;
            }

            let line_text = String::from_utf8_lossy(&line);
            if let Some((name, value)) = line_text.split_once(": ") {
                header.headers.insert(name.to_string(), value.to_string());
            }
        }

        Ok(header)
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// The left-most DNS label of the `Host` header, used as the session id
    /// for routing. Strips a trailing `:port` implicitly, since `.` splits
    /// before any `:`.
    pub fn host_label(&self) -> Option<&str> {
        self.headers.get("Host").and_then(|h| h.split('.').next())
    }
}

async fn read_header_line<R: AsyncRead + Unpin>(reader: &mut R, out: &mut Vec<u8>) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(CodecError::IncompleteHeaderLine);
        }
        out.push(byte[0]);
        if out.ends_with(LINE_SEP) {
            out.truncate(out.len() - LINE_SEP.len());
            return Ok(());
        }
    }
}
