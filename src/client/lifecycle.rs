//! Tunnel client state machine.
//!
//! # Data Flow
//! ```text
//! Disconnected ─begin_attempt─▶ Resolving ─lookup_host─▶ Connecting
//!     ▲                                                     │ TCP + keep-alive
//!     │                                                     │ TLS handshake
//!     │                                                     │ setup exchange
//!     └──── any failure, read/write loss, stop() ◀── Connected
//!                                                  receive loop → dispatcher
//!                                                  outbound queue → send loop
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::codec::Framed;

use super::dispatcher::LocalDispatcher;
use super::outbound::{self, OutboundQueue};
use super::status::{Attempt, ConnectionStatus, StatusCallback, StatusNotifier};
use crate::config::{BackendConfig, ClientConfig};
use crate::net::keepalive;
use crate::net::tls::{self, TlsError, VerifyHook};
use crate::protocol::{self, CodecError, TunnelCodec};

/// Errors that end a connect attempt or a live session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    #[error("{0} resolved to no addresses")]
    NoAddress(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("TLS handshake failed: {0}")]
    Handshake(std::io::Error),

    #[error("failed to build setup request: {0}")]
    Http(#[from] http::Error),

    #[error("tunnel framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("server rejected tunnel setup with {0}")]
    SetupRejected(StatusCode),

    #[error("server closed the connection")]
    Closed,

    #[error("client stopped during connect")]
    Stopped,
}

/// Steady-state framing on the client side: decode requests, encode responses.
pub type ClientFramed<S> = Framed<S, TunnelCodec<Request<Bytes>>>;

/// Dials the tunnel server and serves its requests from the local backend.
pub struct TunnelClient {
    config: ClientConfig,
    status: StatusNotifier,
    verify_hook: Option<VerifyHook>,
    session: Mutex<Option<AbortHandle>>,
}

impl TunnelClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            status: StatusNotifier::new(None),
            verify_hook: None,
            session: Mutex::new(None),
        }
    }

    /// Call `callback` on every status change.
    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.status = StatusNotifier::new(Some(callback));
        self
    }

    /// Let `hook` decide on the server certificate when verification is on.
    pub fn with_verify_hook(mut self, hook: VerifyHook) -> Self {
        self.verify_hook = Some(hook);
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Start a connect attempt in the background if the client is
    /// Disconnected. Returns false when an attempt or session is already
    /// running.
    pub fn start_session(self: &Arc<Self>) -> bool {
        let Some(attempt) = self.status.begin_attempt() else {
            return false;
        };

        let client = Arc::clone(self);
        let handle = tokio::spawn(async move { client.run_session(attempt).await });
        *self.lock_session() = Some(handle.abort_handle());
        true
    }

    /// Abort the current attempt or session and mark the client Disconnected.
    ///
    /// `abort` only lands at the task's next await, so the attempt is also
    /// retired: a task still being polled elsewhere can no longer publish.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_session().take() {
            handle.abort();
        }
        self.status.reset();
    }

    async fn run_session(&self, attempt: Attempt) {
        let server = &self.config.server;
        match self.connect_and_serve(attempt).await {
            Ok(()) => tracing::info!(host = %server.host, port = server.port, "Tunnel session ended"),
            Err(e) => tracing::warn!(host = %server.host, port = server.port, error = %e, "Tunnel session failed"),
        }
        self.status.advance(attempt, ConnectionStatus::Disconnected);
    }

    async fn connect_and_serve(&self, attempt: Attempt) -> Result<(), ClientError> {
        let server = &self.config.server;

        let addr = tokio::net::lookup_host((server.host.as_str(), server.port))
            .await
            .map_err(|source| ClientError::Resolve {
                host: server.host.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ClientError::NoAddress(server.host.clone()))?;

        if !self.status.advance(attempt, ConnectionStatus::Connecting) {
            return Err(ClientError::Stopped);
        }
        tracing::debug!(addr = %addr, "Connecting to tunnel server");

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        keepalive::apply(&stream);

        if !self.config.tls.enabled {
            return self.establish(attempt, stream, addr).await;
        }

        let connector = tls::build_connector(&self.config.tls, self.verify_hook.clone())?;
        let name = tls::server_name(self.config.tls.server_name.as_deref().unwrap_or(&server.host))?;
        let stream = connector
            .connect(name, stream)
            .await
            .map_err(ClientError::Handshake)?;
        self.establish(attempt, stream, addr).await
    }

    async fn establish<S>(&self, attempt: Attempt, io: S, addr: SocketAddr) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let server = &self.config.server;
        let framed = setup(io, &server.session_id, server.max_frame_bytes).await?;

        if !self.status.advance(attempt, ConnectionStatus::Connected) {
            return Err(ClientError::Stopped);
        }
        tracing::info!(addr = %addr, session_id = %server.session_id, "Tunnel connected");

        serve_session(framed, &self.config.backend).await
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Perform the setup exchange for `session_id` over `io`.
///
/// Any non-2xx answer, or a connection that closes first, is an error.
pub async fn setup<S>(io: S, session_id: &str, max_frame_bytes: usize) -> Result<ClientFramed<S>, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, TunnelCodec::<Response<Bytes>>::new(max_frame_bytes));
    framed.send(protocol::setup_request(session_id)?).await?;

    let answer = framed.next().await.ok_or(ClientError::Closed)??;
    if !answer.status().is_success() {
        return Err(ClientError::SetupRejected(answer.status()));
    }

    Ok(framed.map_codec(|codec| TunnelCodec::<Request<Bytes>>::new(codec.max_body())))
}

/// Serve tunnel requests until the connection is lost.
///
/// Each request is dispatched on its own task so slow backend calls never
/// hold up the next frame. Frames without a transaction id are dropped.
pub async fn serve_session<S>(framed: ClientFramed<S>, backend: &BackendConfig) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, mut stream) = framed.split::<Response<Bytes>>();
    let (queue, rx) = OutboundQueue::new();
    let dispatcher = LocalDispatcher::new(backend, queue);

    let receive = async {
        while let Some(frame) = stream.next().await {
            let mut request = frame?;
            let Some(tid) = protocol::take_tid(request.headers_mut()) else {
                tracing::warn!(
                    method = %request.method(),
                    uri = %request.uri(),
                    "Dropping tunnel request without transaction id"
                );
                continue;
            };

            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(tid, request).await });
        }
        Ok::<_, ClientError>(())
    };

    let send = async { outbound::send_loop(rx, sink).await.map_err(ClientError::from) };

    tokio::select! {
        result = receive => result,
        result = send => result,
    }
}
