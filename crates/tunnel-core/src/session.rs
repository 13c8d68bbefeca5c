use std::collections::{HashMap, VecDeque};

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use tunnel_codec::control::response;
use tunnel_codec::ControlFrame;

use crate::auth::POOL_SIZE;
use crate::error::{Result, TunnelError};

struct Session {
    pool: HashMap<String, TcpStream>,
    free: VecDeque<String>,
}

impl Session {
    fn new() -> Self {
        Self {
            pool: HashMap::new(),
            free: VecDeque::new(),
        }
    }

    fn count(&self) -> usize {
        self.pool.len()
    }
}

/// Outcome of a JOIN attempt. The parked socket is handed back on every
/// non-success path so the caller can still write a response frame and close
/// it — `SessionRegistry::join` only consumes the socket once it's certain
/// the connection is being parked.
pub enum JoinOutcome {
    Parked,
    UnknownSession(TcpStream),
    PoolFull(TcpStream),
}

/// Owns every live session and the parked connection pool inside each one.
///
/// All mutation funnels through one async mutex: sessions churn far less
/// often than the HTTP traffic routed through them, and dequeuing a parked
/// socket must decrement the pool's free count as a single atomic step.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, id: String) {
        self.sessions.lock().await.insert(id, Session::new());
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Removes the session. Dropping it closes every socket still parked
    /// inside, same as the reference implementation's explicit pool sweep.
    pub async fn delete(&self, id: &str) {
        self.sessions.lock().await.remove(id);
    }

    pub async fn close_all(&self) {
        self.sessions.lock().await.clear();
    }

    /// Checks capacity, writes the SUCCESS response, and parks `socket` into
    /// the session's pool, all under one lock acquisition so a racing DELETE
    /// or JOIN observes a consistent pool size.
    pub async fn join(&self, id: &str, conn_id: String, mut socket: TcpStream) -> Result<JoinOutcome> {
        let mut guard = self.sessions.lock().await;
        let Some(session) = guard.get_mut(id) else {
            return Ok(JoinOutcome::UnknownSession(socket));
        };
        if session.count() >= POOL_SIZE {
            return Ok(JoinOutcome::PoolFull(socket));
        }

        let frame = ControlFrame::new(response::SUCCESS).with_key(id.as_bytes());
        frame.write(&mut socket).await?;

        session.free.push_back(conn_id.clone());
        session.pool.insert(conn_id, socket);
        Ok(JoinOutcome::Parked)
    }

    /// Pops the oldest parked socket for `id`.
    pub async fn dequeue(&self, id: &str) -> Result<(String, TcpStream)> {
        let mut guard = self.sessions.lock().await;
        let session = guard.get_mut(id).ok_or(TunnelError::UnknownSession)?;
        let conn_id = session.free.pop_front().ok_or(TunnelError::PoolEmpty)?;
        let socket = session
            .pool
            .remove(&conn_id)
            .expect("free and pool are kept in sync");
        Ok((conn_id, socket))
    }
}
