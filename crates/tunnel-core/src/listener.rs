use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

use tunnel_codec::control::{request, response};
use tunnel_codec::{ControlFrame, HttpRequestHeader};

use crate::auth::AuthAuthority;
use crate::error::{Result, TunnelError};
use crate::relay::{copy_exact, CHUNK};
use crate::session::{JoinOutcome, SessionRegistry};

/// Accepts connections on one TCP port and routes each to either the control
/// protocol (CREATE/JOIN/DELETE/GENERATE_KEY/REVOKE_KEY) or the HTTP forward
/// path, discriminated by the first byte read off the wire.
pub struct Listener {
    addr: SocketAddr,
    auth: Arc<AuthAuthority>,
    sessions: Arc<SessionRegistry>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    listener: Option<TcpListener>,
}

impl Listener {
    pub fn new(addr: SocketAddr, auth: AuthAuthority) -> Self {
        Self {
            addr,
            auth: Arc::new(auth),
            sessions: Arc::new(SessionRegistry::new()),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            listener: None,
        }
    }

    /// PEM-encoded UIMA public key, if the listener was built in UIMA mode.
    pub fn public_key_pem(&self) -> Option<String> {
        self.auth.public_key_pem()
    }

    pub async fn setup(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("listener bound: addr={}", self.addr);
        self.listener = Some(listener);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// The address actually bound by [`Listener::setup`] — useful when
    /// `addr` was given with an ephemeral port (`:0`).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self
            .listener
            .as_ref()
            .expect("setup must be called before local_addr")
            .local_addr()?)
    }

    /// Runs the accept loop until [`Listener::stop`] is called. Must be
    /// preceded by [`Listener::setup`].
    pub async fn listen(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .expect("setup must be called before listen");

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: error={:?}", e);
                            continue;
                        }
                    };
                    info!("accepted connection: peer={}", peer);

                    let auth = self.auth.clone();
                    let sessions = self.sessions.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, peer, auth, sessions).await {
                            warn!("connection handler failed: peer={}, error={:?}", peer, e);
                        }
                    });
                }
                _ = self.shutdown.notified() => {
                    return Ok(());
                }
            }
        }
    }

    /// Stops the accept loop and drops every live session, closing every
    /// parked socket they hold.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.sessions.close_all().await;
        self.shutdown.notify_waiters();
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    auth: Arc<AuthAuthority>,
    sessions: Arc<SessionRegistry>,
) -> Result<()> {
    let mut first = [0u8; 1];
    let n = socket.read(&mut first).await?;
    if n == 0 {
        return Ok(());
    }

    if is_control_code(first[0]) {
        handle_control(first[0], socket, auth, sessions).await
    } else {
        handle_http(socket, peer, first[0], sessions).await
    }
}

fn is_control_code(byte: u8) -> bool {
    matches!(
        byte,
        request::CREATE | request::JOIN | request::DELETE | request::GENERATE_KEY | request::REVOKE_KEY
    )
}

async fn handle_control(
    code: u8,
    mut socket: TcpStream,
    auth: Arc<AuthAuthority>,
    sessions: Arc<SessionRegistry>,
) -> Result<()> {
    let req = ControlFrame::read_partial(&mut socket, code).await?;
    match code {
        request::CREATE => handle_create(socket, req, auth, sessions).await,
        request::JOIN => handle_join(socket, req, sessions).await,
        request::DELETE => handle_delete(socket, req, sessions).await,
        request::GENERATE_KEY => handle_generate_key(socket, req, auth).await,
        request::REVOKE_KEY => handle_revoke_key(socket, req, auth).await,
        _ => unreachable!("is_control_code gated this"),
    }
}

async fn write_and_close(socket: &mut TcpStream, code: u8, key: &[u8], message: &[u8]) -> Result<()> {
    let frame = ControlFrame::new(code).with_key(key).with_message(message);
    frame.write(socket).await?;
    let _ = socket.shutdown().await;
    Ok(())
}

async fn handle_create(
    mut socket: TcpStream,
    req: ControlFrame,
    auth: Arc<AuthAuthority>,
    sessions: Arc<SessionRegistry>,
) -> Result<()> {
    let token = req.key_str();
    if !auth.is_valid_auth_token(&token) {
        warn!("create rejected: invalid token");
        return write_and_close(&mut socket, response::AUTH_ERROR, &[], &[]).await;
    }

    let session_id = crate::auth::sha256_b64url43(token.as_bytes());
    sessions.create(session_id.clone()).await;
    info!("session created: session_id={}", session_id);
    write_and_close(&mut socket, response::SUCCESS, session_id.as_bytes(), &[]).await
}

async fn handle_join(socket: TcpStream, req: ControlFrame, sessions: Arc<SessionRegistry>) -> Result<()> {
    let session_id = req.key_str();
    let conn_id = req.message_str();

    match sessions.join(&session_id, conn_id, socket).await? {
        JoinOutcome::Parked => {
            info!("joined pool: session_id={}", session_id);
            Ok(())
        }
        JoinOutcome::UnknownSession(mut socket) => {
            warn!("join rejected: unknown session_id={}", session_id);
            write_and_close(&mut socket, response::AUTH_ERROR, session_id.as_bytes(), &[]).await
        }
        JoinOutcome::PoolFull(mut socket) => {
            warn!("join rejected: pool full, session_id={}", session_id);
            write_and_close(&mut socket, response::FULL, session_id.as_bytes(), &[]).await
        }
    }
}

async fn handle_delete(mut socket: TcpStream, req: ControlFrame, sessions: Arc<SessionRegistry>) -> Result<()> {
    let session_id = req.key_str();
    sessions.delete(&session_id).await;
    info!("session deleted: session_id={}", session_id);
    write_and_close(&mut socket, response::SUCCESS, &[], &[]).await
}

async fn handle_generate_key(mut socket: TcpStream, req: ControlFrame, auth: Arc<AuthAuthority>) -> Result<()> {
    if !auth.is_uima() {
        return write_and_close(&mut socket, response::NOT_UIMA, &[], &[]).await;
    }

    match auth.decrypt(&req.key) {
        Ok(plaintext) if plaintext == b"3" => {}
        _ => {
            warn!("generate-key rejected: invalid signing cipher");
            return write_and_close(&mut socket, response::AUTH_ERROR, &[], &[]).await;
        }
    }

    match auth.generate_key() {
        Ok((token, id)) => {
            info!("key generated: id={}", id);
            write_and_close(&mut socket, response::SUCCESS, token.as_bytes(), id.to_string().as_bytes()).await
        }
        Err(TunnelError::TooManyKeys) => {
            warn!("generate-key rejected: token store full");
            write_and_close(&mut socket, response::FULL, &[], &[]).await
        }
        Err(e) => Err(e),
    }
}

async fn handle_revoke_key(mut socket: TcpStream, req: ControlFrame, auth: Arc<AuthAuthority>) -> Result<()> {
    if !auth.is_uima() {
        return write_and_close(&mut socket, response::NOT_UIMA, &[], &[]).await;
    }

    let plaintext = match auth.decrypt(&req.key) {
        Ok(pt) => pt,
        Err(_) => {
            warn!("revoke-key rejected: invalid signing cipher");
            return write_and_close(&mut socket, response::AUTH_ERROR, &[], &[]).await;
        }
    };

    // Single-byte id payload, widened to u16 with a zero high byte (wire
    // format preserved verbatim; see SPEC_FULL.md's revoke-key open question).
    let id = *plaintext.first().unwrap_or(&0) as u16;
    match auth.revoke_key(id) {
        Some(token) => {
            info!("key revoked: id={}", id);
            write_and_close(&mut socket, response::SUCCESS, token.as_bytes(), &[]).await
        }
        None => {
            warn!("revoke-key: no token found for id={}", id);
            write_and_close(&mut socket, response::SUCCESS, &[], &[]).await
        }
    }
}

async fn handle_http(
    mut socket: TcpStream,
    peer: SocketAddr,
    prefix: u8,
    sessions: Arc<SessionRegistry>,
) -> Result<()> {
    let header = match HttpRequestHeader::read(&mut socket, Some(prefix)).await {
        Ok(h) => h,
        Err(e) => {
            warn!("malformed http request: peer={}, error={:?}", peer, e);
            return Ok(());
        }
    };

    let Some(session_id) = header.host_label() else {
        return respond_404(&mut socket, "No session found").await;
    };
    let session_id = session_id.to_string();

    let (conn_id, mut parked) = match sessions.dequeue(&session_id).await {
        Ok(pair) => pair,
        Err(TunnelError::UnknownSession) => return respond_404(&mut socket, "No session found").await,
        Err(TunnelError::PoolEmpty) => {
            return respond_404(&mut socket, "No free connection available in the pool").await
        }
        Err(e) => return Err(e),
    };

    info!("forwarding request: session_id={}, conn_id={}", session_id, conn_id);
    relay_pair(&mut socket, &mut parked, &header).await
}

async fn respond_404(socket: &mut TcpStream, message: &str) -> Result<()> {
    let body = format!("{{\"error\":\"{}\"}}", message);
    let response = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    let _ = socket.shutdown().await;
    Ok(())
}

async fn relay_pair(client: &mut TcpStream, parked: &mut TcpStream, header: &HttpRequestHeader) -> Result<()> {
    parked.write_all(&header.buffer).await?;

    if let Some(len) = header.content_length() {
        copy_exact(client, parked, len).await?;
    }

    let mut buf = [0u8; CHUNK];
    loop {
        let n = parked.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        client.write_all(&buf[..n]).await?;
    }

    let _ = client.shutdown().await;
    let _ = parked.shutdown().await;
    Ok(())
}
