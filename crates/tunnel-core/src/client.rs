//! One-shot control requests used by the `generate-key` and `revoke-key` CLI
//! commands. Unlike [`crate::forwarder::Forwarder`], these dial the listener
//! once, send a single control frame, and return.

use tokio::net::TcpStream;

use tunnel_codec::control::{request, response};
use tunnel_codec::ControlFrame;

use crate::error::{Result, TunnelError};

/// Sends GENERATE_KEY with `cipher` (an OAEP encryption of `"3"` under the
/// listener's public key) and returns the minted token and its id.
pub async fn generate_key(proxy_addr: &str, cipher: &[u8]) -> Result<(String, u32)> {
    let mut stream = TcpStream::connect(proxy_addr).await?;
    let req = ControlFrame::new(request::GENERATE_KEY).with_key(cipher);
    req.write(&mut stream).await?;

    let resp = ControlFrame::read(&mut stream).await?;
    match resp.code {
        response::SUCCESS => {
            let id = resp.message_str().parse().unwrap_or(0);
            Ok((resp.key_str(), id))
        }
        response::NOT_UIMA => Err(TunnelError::NotUima),
        response::AUTH_ERROR => Err(TunnelError::AuthInvalidCipher),
        response::FULL => Err(TunnelError::TooManyKeys),
        _ => Err(TunnelError::Protocol),
    }
}

/// Sends REVOKE_KEY with `cipher` (an OAEP encryption of the target id under
/// the listener's public key) and returns the revoked token, or `None` if no
/// token was assigned that id.
pub async fn revoke_key(proxy_addr: &str, cipher: &[u8]) -> Result<Option<String>> {
    let mut stream = TcpStream::connect(proxy_addr).await?;
    let req = ControlFrame::new(request::REVOKE_KEY).with_key(cipher);
    req.write(&mut stream).await?;

    let resp = ControlFrame::read(&mut stream).await?;
    match resp.code {
        response::SUCCESS => {
            let token = resp.key_str();
            Ok(if token.is_empty() { None } else { Some(token) })
        }
        response::NOT_UIMA => Err(TunnelError::NotUima),
        response::AUTH_ERROR => Err(TunnelError::AuthInvalidCipher),
        _ => Err(TunnelError::Protocol),
    }
}
