//! Accepts tunnel connections from clients.
//!
//! # Responsibilities
//! - Accept TCP connections up to `tunnel.max_tunnels`
//! - Enable keep-alive and perform the optional TLS handshake
//! - Validate the setup request and answer it
//! - Register the tunnel, drive it, and unregister it when it dies

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;

use super::mux::{TunnelError, TunnelMux};
use super::registry::SessionRegistry;
use crate::config::ServerConfig;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::keepalive;
use crate::net::listener::{Listener, ListenerError};
use crate::protocol::{self, TunnelCodec};

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How long a new connection has to send its setup request.
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of the answer to a setup request without a session id.
pub const MISSING_SESSION_BODY: &str = "missing session id";

/// Listens for tunnel clients and hands each one to the registry.
pub struct TunnelAcceptor {
    listener: Listener,
    tls: Option<TlsAcceptor>,
    handler: TunnelHandler,
}

/// Per-connection state shared by every accepted tunnel.
#[derive(Clone)]
struct TunnelHandler {
    registry: Arc<SessionRegistry>,
    tracker: ConnectionTracker,
    max_frame_bytes: usize,
    request_timeout: Option<Duration>,
}

impl TunnelAcceptor {
    /// Bind the tunnel endpoint described by `config`.
    pub async fn bind(
        config: &ServerConfig,
        registry: Arc<SessionRegistry>,
        tls: Option<TlsAcceptor>,
    ) -> Result<Self, ListenerError> {
        let listener = Listener::bind(&config.tunnel.bind_address, config.tunnel.max_tunnels).await?;
        Ok(Self {
            listener,
            tls,
            handler: TunnelHandler {
                registry,
                tracker: ConnectionTracker::new(),
                max_frame_bytes: config.tunnel.max_frame_bytes,
                request_timeout: config.timeouts.request_timeout(),
            },
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Live tunnel counter, shared with the admin API.
    pub fn tracker(&self) -> ConnectionTracker {
        self.handler.tracker.clone()
    }

    /// Accept tunnels until `shutdown` fires.
    ///
    /// Accept errors never end the loop; shutdown does, and it also stops
    /// every live tunnel.
    pub async fn run(self, shutdown: Shutdown) {
        let mut stop = shutdown.subscribe();
        tracing::info!(
            tls = self.tls.is_some(),
            max_tunnels = self.listener.max_connections(),
            "Accepting tunnel connections"
        );

        loop {
            let accepted = tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("Tunnel acceptor stopping");
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Closed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Tunnel accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            keepalive::apply(&stream);
            let handler = self.handler.clone();
            let tls = self.tls.clone();
            let tunnel_shutdown = shutdown.subscribe();

            tokio::spawn(async move {
                let _permit = permit;
                let result = match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(stream) => handler.serve(stream, peer_addr, tunnel_shutdown).await,
                        Err(e) => {
                            tracing::warn!(peer_addr = %peer_addr, error = %e, "Tunnel TLS handshake failed");
                            return;
                        }
                    },
                    None => handler.serve(stream, peer_addr, tunnel_shutdown).await,
                };

                if let Err(e) = result {
                    tracing::debug!(peer_addr = %peer_addr, error = %e, "Tunnel connection ended");
                }
            });
        }
    }
}

impl TunnelHandler {
    async fn serve<S>(
        self,
        io: S,
        peer_addr: SocketAddr,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, TunnelCodec::<Request<Bytes>>::new(self.max_frame_bytes));

        let setup = match tokio::time::timeout(SETUP_TIMEOUT, framed.next()).await {
            Ok(Some(setup)) => setup?,
            Ok(None) => return Err(TunnelError::Closed),
            Err(_) => return Err(TunnelError::Timeout(SETUP_TIMEOUT)),
        };

        let Some(session_id) = protocol::session_id(setup.headers()).map(str::to_owned) else {
            tracing::warn!(peer_addr = %peer_addr, "Rejecting tunnel setup without session id");
            let mut answer = protocol::text_response(StatusCode::BAD_REQUEST, MISSING_SESSION_BODY);
            protocol::set_keep_alive(answer.headers_mut(), false);
            framed.send(answer).await?;
            return Err(TunnelError::MissingSessionId);
        };

        if setup.uri().to_string() != protocol::SETUP_TARGET {
            tracing::debug!(
                peer_addr = %peer_addr,
                target = %setup.uri(),
                "Setup request with unexpected target"
            );
        }

        framed.send(protocol::setup_accepted()).await?;
        let framed = framed.map_codec(|codec| TunnelCodec::<Response<Bytes>>::new(codec.max_body()));

        let (tunnel, driver) = TunnelMux::new(session_id, Some(peer_addr), self.request_timeout);
        let _guard = self.tracker.track(tunnel.id());
        self.registry.add(Arc::clone(&tunnel));

        tracing::info!(
            connection_id = %tunnel.id(),
            session_id = %tunnel.session_id(),
            peer_addr = %peer_addr,
            "Tunnel established"
        );

        let result = driver.run(framed, shutdown).await;
        self.registry.remove(&tunnel);
        result
    }
}
