use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Result;

/// Chunk size used to pump request/response bodies between the two halves
/// of a relayed connection.
pub const CHUNK: usize = 64;

/// Streams exactly `remaining` bytes from `src` to `dst`, `CHUNK` bytes at a
/// time (the final chunk may be shorter). Used once a request's
/// `Content-Length` is known, so the relay doesn't have to guess where the
/// body ends.
pub async fn copy_exact(src: &mut TcpStream, dst: &mut TcpStream, mut remaining: usize) -> Result<()> {
    let mut buf = [0u8; CHUNK];
    while remaining > 0 {
        let take = remaining.min(CHUNK);
        let n = src.read(&mut buf[..take]).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        remaining -= n;
    }
    Ok(())
}
