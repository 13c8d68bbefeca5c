use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use tunnel_codec::control::{request, response};
use tunnel_codec::{ControlFrame, HttpRequestHeader};

use crate::auth::POOL_SIZE;
use crate::error::{Result, TunnelError};
use crate::relay::{copy_exact, CHUNK};

const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Keeps `POOL_SIZE` connections parked against the listener at all times.
///
/// [`Forwarder::connect`] performs the CREATE handshake and seeds a
/// pool-slot channel with one id per slot. [`Forwarder::listen`] then runs
/// the refill loop: every time a slot id comes free (initially, or after a
/// relayed request finishes) it spawns a task that JOINs the listener again
/// under that id and waits for a request to relay to the local origin.
pub struct Forwarder {
    proxy_addr: String,
    origin_addr: SocketAddr,
    token: String,
    session_id: Mutex<Option<String>>,
    slots_tx: mpsc::Sender<u8>,
    slots_rx: Mutex<mpsc::Receiver<u8>>,
    quit_tx: mpsc::Sender<TunnelError>,
    quit_rx: Mutex<mpsc::Receiver<TunnelError>>,
}

impl Forwarder {
    pub fn new(proxy_addr: String, origin_addr: SocketAddr, token: String) -> Arc<Self> {
        let (slots_tx, slots_rx) = mpsc::channel(POOL_SIZE);
        let (quit_tx, quit_rx) = mpsc::channel(1);
        Arc::new(Self {
            proxy_addr,
            origin_addr,
            token,
            session_id: Mutex::new(None),
            slots_tx,
            slots_rx: Mutex::new(slots_rx),
            quit_tx,
            quit_rx: Mutex::new(quit_rx),
        })
    }

    /// Sends CREATE and, on success, fills the slot channel with `0..POOL_SIZE`.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let mut stream = TcpStream::connect(&self.proxy_addr).await?;
        let req = ControlFrame::new(request::CREATE).with_key(self.token.as_bytes());
        req.write(&mut stream).await?;

        let resp = ControlFrame::read(&mut stream).await?;
        if resp.code != response::SUCCESS {
            return Err(TunnelError::AuthInvalidToken);
        }

        let session_id = resp.key_str();
        info!("session created: session_id={}", session_id);
        *self.session_id.lock().await = Some(session_id);

        for id in 0..POOL_SIZE as u8 {
            // Channel is sized exactly POOL_SIZE and nothing else sends yet.
            let _ = self.slots_tx.send(id).await;
        }
        Ok(())
    }

    /// Runs the refill loop until a fatal error (typically a revoked token)
    /// arrives on the quit channel, or [`Forwarder::disconnect`] is called.
    pub async fn listen(self: &Arc<Self>) -> Result<()> {
        let session_id = self
            .session_id
            .lock()
            .await
            .clone()
            .ok_or(TunnelError::NotConnected)?;

        let mut slots_rx = self.slots_rx.lock().await;
        let mut quit_rx = self.quit_rx.lock().await;

        loop {
            tokio::select! {
                slot = slots_rx.recv() => {
                    let Some(id) = slot else { return Ok(()); };
                    let this = self.clone();
                    let session_id = session_id.clone();
                    tokio::spawn(async move {
                        this.refill(session_id, id).await;
                    });
                }
                reason = quit_rx.recv() => {
                    return Err(reason.unwrap_or(TunnelError::Shutdown));
                }
            }
        }
    }

    /// Sends DELETE (best-effort) and stops the refill loop.
    pub async fn disconnect(self: &Arc<Self>) {
        if let Some(session_id) = self.session_id.lock().await.clone() {
            if let Ok(mut stream) = TcpStream::connect(&self.proxy_addr).await {
                let req = ControlFrame::new(request::DELETE).with_key(session_id.as_bytes());
                let _ = req.write(&mut stream).await;
            }
        }
        let _ = self.quit_tx.send(TunnelError::Shutdown).await;
    }

    /// Keeps trying to park slot `id` against the listener until it succeeds
    /// (then hands off to [`Forwarder::relay`]) or the token is rejected
    /// outright, which is fatal for the whole forwarder.
    async fn refill(self: Arc<Self>, session_id: String, id: u8) {
        loop {
            match self.try_join(&session_id, id).await {
                Ok(Some(mut parked)) => {
                    let mut wake = [0u8; 1];
                    match parked.read(&mut wake).await {
                        Ok(0) | Err(_) => continue,
                        Ok(_) => {}
                    }

                    let this = self.clone();
                    tokio::spawn(async move {
                        this.relay(parked, wake[0]).await;
                        let _ = this.slots_tx.send(id).await;
                    });
                    return;
                }
                Ok(None) => continue,
                Err(TunnelError::AuthInvalidToken) => {
                    warn!("forwarder session rejected: session_id={}", session_id);
                    let _ = self.quit_tx.send(TunnelError::ForwarderAuthFatal).await;
                    return;
                }
                Err(e) => {
                    warn!("join attempt failed: error={:?}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            }
        }
    }

    /// Sends one JOIN for slot `id`. `Ok(None)` means the pool was full and
    /// the caller should retry the same slot.
    async fn try_join(&self, session_id: &str, id: u8) -> Result<Option<TcpStream>> {
        let mut stream = TcpStream::connect(&self.proxy_addr).await?;
        let req = ControlFrame::new(request::JOIN)
            .with_key(session_id.as_bytes())
            .with_message(id.to_string().as_bytes());
        req.write(&mut stream).await?;

        let resp = ControlFrame::read(&mut stream).await?;
        match resp.code {
            response::SUCCESS => Ok(Some(stream)),
            response::FULL => Ok(None),
            response::AUTH_ERROR => Err(TunnelError::AuthInvalidToken),
            _ => Err(TunnelError::Protocol),
        }
    }

    /// Connects to the local origin and pumps one request/response pair
    /// between it and the parked socket.
    async fn relay(&self, mut parked: TcpStream, wake_byte: u8) {
        let mut origin = match TcpStream::connect(self.origin_addr).await {
            Ok(s) => s,
            Err(e) => {
                warn!("cannot reach local origin: addr={}, error={:?}", self.origin_addr, e);
                let body = "{\"error\":\"Cannot connect to the local adress\"}";
                let response = format!(
                    "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = parked.write_all(response.as_bytes()).await;
                let _ = parked.shutdown().await;
                return;
            }
        };

        if let Err(e) = self.pump(&mut parked, &mut origin, wake_byte).await {
            warn!("relay failed: error={:?}", e);
        }

        let _ = parked.shutdown().await;
        let _ = origin.shutdown().await;
    }

    async fn pump(&self, parked: &mut TcpStream, origin: &mut TcpStream, wake_byte: u8) -> Result<()> {
        let header = HttpRequestHeader::read(parked, Some(wake_byte)).await?;
        origin.write_all(&header.buffer).await?;

        if let Some(len) = header.content_length() {
            copy_exact(parked, origin, len).await?;
        }

        let mut buf = [0u8; CHUNK];
        loop {
            let n = origin.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            parked.write_all(&buf[..n]).await?;
        }
        Ok(())
    }
}
