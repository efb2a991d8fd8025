//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use reverse_tunnel::client::{ConnectionStatus, ReconnectMonitor, TunnelClient};
use reverse_tunnel::config::{ClientConfig, ServerConfig};
use reverse_tunnel::http::HttpServer;
use reverse_tunnel::lifecycle::Shutdown;
use reverse_tunnel::net::tls::install_crypto_provider;
use reverse_tunnel::tunnel::{SessionRegistry, TunnelAcceptor};

/// Read one request head (and whatever body arrived with it) from `socket`.
async fn drain_request(socket: &mut TcpStream) {
    let mut buf = vec![0u8; 16 * 1024];
    let mut read = 0;
    while read < buf.len() {
        match socket.read(&mut buf[read..]).await {
            Ok(0) | Err(_) => return,
            Ok(n) => read += n,
        }
        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            return;
        }
    }
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        201 => "201 Created",
        404 => "404 Not Found",
        500 => "500 Internal Server Error",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend with async support.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        drain_request(&mut socket).await;
                        let (status, body) = f().await;
                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_line(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn server_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.tunnel.bind_address = "127.0.0.1:0".into();
    config
}

pub struct TestServer {
    pub front_addr: SocketAddr,
    pub tunnel_addr: SocketAddr,
    pub registry: Arc<SessionRegistry>,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.front_addr, path)
    }
}

/// Start the front-end and tunnel endpoint described by `config`.
pub async fn start_server(config: ServerConfig, tls: Option<TlsAcceptor>) -> TestServer {
    let registry = Arc::new(SessionRegistry::new());
    let acceptor = TunnelAcceptor::bind(&config, Arc::clone(&registry), tls)
        .await
        .unwrap();
    let tunnel_addr = acceptor.local_addr().unwrap();

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let front_addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    tokio::spawn(acceptor.run(shutdown.clone()));
    tokio::spawn(HttpServer::new(&config, Arc::clone(&registry)).run(listener, shutdown.clone()));

    TestServer {
        front_addr,
        tunnel_addr,
        registry,
        shutdown,
    }
}

/// Plain-TCP client configuration serving `session_id` from `backend`.
pub fn client_config(tunnel_addr: SocketAddr, session_id: &str, backend: SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.server.host = tunnel_addr.ip().to_string();
    config.server.port = tunnel_addr.port();
    config.server.session_id = session_id.into();
    config.tls.enabled = false;
    config.backend.address = backend.to_string();
    config.backend.connect_timeout_secs = 1;
    config
}

/// Run `client` under a reconnect monitor. Trigger the returned shutdown to stop it.
pub fn start_client(client: Arc<TunnelClient>, interval: Duration) -> Shutdown {
    let shutdown = Shutdown::new();
    tokio::spawn(ReconnectMonitor::new(client, interval).run(shutdown.clone()));
    shutdown
}

/// Wait (bounded) until `client` reports Connected.
pub async fn wait_connected(client: &TunnelClient) {
    let mut status = client.subscribe();
    tokio::time::timeout(
        Duration::from_secs(10),
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .expect("client did not connect in time")
    .unwrap();
}

/// Poll until `condition` holds, failing the test after five seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Common name of the test server certificate.
pub const TEST_CERT_CN: &str = "tunnel test server";

/// Self-signed certificate for `localhost` with subject `CN=TEST_CERT_CN`:
/// the server's acceptor and a PEM file the client can trust.
pub fn self_signed_tls() -> (TlsAcceptor, PathBuf) {
    install_crypto_provider();
    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params.distinguished_name.push(rcgen::DnType::CommonName, TEST_CERT_CN);
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();

    let ca_path = std::env::temp_dir().join(format!("tunnel-test-ca-{}.pem", uuid::Uuid::new_v4().simple()));
    std::fs::write(&ca_path, cert.pem()).unwrap();

    (TlsAcceptor::from(Arc::new(config)), ca_path)
}
