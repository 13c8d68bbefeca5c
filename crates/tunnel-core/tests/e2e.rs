use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tunnel_codec::control::{request, response};
use tunnel_codec::ControlFrame;
use tunnel_core::auth::encrypt_with_public_key_pem;
use tunnel_core::{sha256_b64url43, AuthAuthority, Forwarder, Listener, TunnelError};

async fn spawn_listener(auth: AuthAuthority) -> SocketAddr {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut listener = Listener::new(addr, auth);
    listener.setup().await.unwrap();
    let bound = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.listen().await;
    });
    bound
}

async fn create_session(addr: SocketAddr, token: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::CREATE).with_key(token.as_bytes());
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    assert_eq!(resp.code, response::SUCCESS);
    resp.key_str()
}

async fn join(addr: SocketAddr, session_id: &str, conn_id: &str) -> (TcpStream, u8) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::JOIN)
        .with_key(session_id.as_bytes())
        .with_message(conn_id.as_bytes());
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    (stream, resp.code)
}

#[tokio::test]
async fn happy_path_forwards_a_request_to_the_parked_device() {
    let addr = spawn_listener(AuthAuthority::new_default()).await;
    let session_id = create_session(addr, &"0".repeat(43)).await;

    let (mut device, code) = join(addr, &session_id, "0").await;
    assert_eq!(code, response::SUCCESS);

    let host = format!("{}.tunnel.local", session_id);
    let client_task = tokio::spawn(async move {
        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET /widgets HTTP/1.1\r\nHost: {}\r\n\r\n", host);
        client.write_all(request.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        out
    });

    let mut buf = vec![0u8; 512];
    let n = device.read(&mut buf).await.unwrap();
    let forwarded = String::from_utf8_lossy(&buf[..n]);
    assert!(forwarded.starts_with("GET /widgets HTTP/1.1"));

    device
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();
    device.shutdown().await.unwrap();

    let response_bytes = client_task.await.unwrap();
    let response_text = String::from_utf8_lossy(&response_bytes);
    assert!(response_text.contains("200 OK"));
    assert!(response_text.ends_with("hello"));
}

#[tokio::test]
async fn unknown_host_gets_a_404() {
    let addr = spawn_listener(AuthAuthority::new_default()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: nonexistent.tunnel.local\r\n\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("404 Not Found"));
    assert!(text.contains("No session found"));
}

#[tokio::test]
async fn pool_fills_after_five_joins() {
    let addr = spawn_listener(AuthAuthority::new_default()).await;
    let session_id = create_session(addr, &"0".repeat(43)).await;

    let mut parked = Vec::new();
    for i in 0..5u8 {
        let (stream, code) = join(addr, &session_id, &i.to_string()).await;
        assert_eq!(code, response::SUCCESS);
        parked.push(stream);
    }

    let (_overflow, code) = join(addr, &session_id, "5").await;
    assert_eq!(code, response::FULL);
}

#[tokio::test]
async fn delete_closes_every_parked_socket() {
    let addr = spawn_listener(AuthAuthority::new_default()).await;
    let session_id = create_session(addr, &"0".repeat(43)).await;

    let (mut device, code) = join(addr, &session_id, "0").await;
    assert_eq!(code, response::SUCCESS);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::DELETE).with_key(session_id.as_bytes());
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    assert_eq!(resp.code, response::SUCCESS);

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(1), device.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn uima_mints_a_token_that_creates_a_session() {
    let auth = AuthAuthority::new_uima().unwrap();
    let pem = auth.public_key_pem().unwrap();
    let cipher = encrypt_with_public_key_pem(&pem, b"3").unwrap();

    let addr = spawn_listener(auth).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::GENERATE_KEY).with_key(&cipher);
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    assert_eq!(resp.code, response::SUCCESS);

    let token = resp.key_str();
    assert_eq!(token.len(), 43);

    let session_id = create_session(addr, &token).await;
    assert_eq!(session_id.len(), 43);
}

#[tokio::test]
async fn uima_revoked_token_is_rejected() {
    let auth = AuthAuthority::new_uima().unwrap();
    let pem = auth.public_key_pem().unwrap();
    let addr = spawn_listener(auth).await;

    let generate_cipher = encrypt_with_public_key_pem(&pem, b"3").unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::GENERATE_KEY).with_key(&generate_cipher);
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    let token = resp.key_str();
    let id: u8 = resp.message_str().parse().unwrap();

    let revoke_cipher = encrypt_with_public_key_pem(&pem, &[id]).unwrap();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::REVOKE_KEY).with_key(&revoke_cipher);
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    assert_eq!(resp.code, response::SUCCESS);
    assert_eq!(resp.key_str(), token);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::CREATE).with_key(token.as_bytes());
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    assert_eq!(resp.code, response::AUTH_ERROR);
}

#[tokio::test]
async fn forwarder_relays_a_request_to_the_local_origin() {
    let addr = spawn_listener(AuthAuthority::new_default()).await;

    let origin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_addr = origin_listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = origin_listener.accept().await.unwrap();
        let mut buf = vec![0u8; 512];
        let n = sock.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("GET /hello"));
        sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK")
            .await
            .unwrap();
        sock.shutdown().await.unwrap();
    });

    let token = "0".repeat(43);
    let forwarder = Forwarder::new(addr.to_string(), origin_addr, token.clone());
    forwarder.connect().await.unwrap();
    let forwarder_task = tokio::spawn({
        let forwarder = forwarder.clone();
        async move { forwarder.listen().await }
    });

    // Give the refill loop a moment to park its slots before the client dials in.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let session_id = sha256_b64url43(token.as_bytes());
    let host = format!("{}.tunnel.local", session_id);
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(format!("GET /hello HTTP/1.1\r\nHost: {}\r\n\r\n", host).as_bytes())
        .await
        .unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("200 OK"));
    assert!(text.ends_with("OK"));

    forwarder.disconnect().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), forwarder_task).await;
}

#[tokio::test]
async fn forwarder_returns_a_404_when_the_local_origin_is_unreachable() {
    let addr = spawn_listener(AuthAuthority::new_default()).await;

    // Bind then drop immediately, so the port is known-unreachable.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_addr = dead.local_addr().unwrap();
    drop(dead);

    let token = "0".repeat(43);
    let forwarder = Forwarder::new(addr.to_string(), origin_addr, token.clone());
    forwarder.connect().await.unwrap();
    let forwarder_task = tokio::spawn({
        let forwarder = forwarder.clone();
        async move { forwarder.listen().await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    let session_id = sha256_b64url43(token.as_bytes());
    let host = format!("{}.tunnel.local", session_id);
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", host).as_bytes())
        .await
        .unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("404 Not Found"));
    assert!(text.contains("Cannot connect to the local adress"));

    forwarder.disconnect().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), forwarder_task).await;
}

#[tokio::test]
async fn forwarder_exits_with_auth_fatal_when_its_session_is_deleted() {
    let addr = spawn_listener(AuthAuthority::new_default()).await;

    let token = "0".repeat(43);
    let origin_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let forwarder = Forwarder::new(addr.to_string(), origin_addr, token.clone());
    forwarder.connect().await.unwrap();

    // Delete the session out from under the forwarder before it ever JOINs,
    // so every refill task's JOIN hits an unknown session-id.
    let session_id = sha256_b64url43(token.as_bytes());
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = ControlFrame::new(request::DELETE).with_key(session_id.as_bytes());
    req.write(&mut stream).await.unwrap();
    let resp = ControlFrame::read(&mut stream).await.unwrap();
    assert_eq!(resp.code, response::SUCCESS);

    let result = tokio::time::timeout(Duration::from_secs(2), forwarder.listen()).await;
    let err = result
        .expect("forwarder.listen() should return once every refill task sees AUTH_ERROR")
        .unwrap_err();
    assert!(matches!(err, TunnelError::ForwarderAuthFatal));
}
