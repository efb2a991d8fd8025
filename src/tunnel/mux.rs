//! Server-side tunnel multiplexer.
//!
//! # Data Flow
//! ```text
//! front-end task ──request()──▶ pending.register(tid)
//!                               outbound channel ──▶ send loop ──▶ socket
//!                                                                   │
//! front-end task ◀──oneshot──── pending.resolve(tid) ◀── receive loop
//! ```
//!
//! # Design Decisions
//! - One writer per connection: callers never touch the socket, they queue
//!   requests for the send loop
//! - The pending table lock is never held across an await
//! - Teardown fails every outstanding call, then closes the table so later
//!   calls fail fast instead of waiting on a dead tunnel

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use uuid::Uuid;

use super::pending::PendingCalls;
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::protocol::{self, CodecError, TunnelCodec};

/// Requests queued for the send loop before callers wait for capacity.
const OUTBOUND_CAPACITY: usize = 64;

/// Body of the response given to calls whose tunnel went away.
pub const TUNNEL_CLOSED_BODY: &str = "tunnel closed";

/// Errors surfaced by [`TunnelMux::request`] and the tunnel driver.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel closed")]
    Closed,

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("tunnel framing error: {0}")]
    Codec(#[from] CodecError),

    #[error("setup request carries no session id")]
    MissingSessionId,

    #[error("transaction id is not a valid header value")]
    InvalidTid,

    #[error("request head too large for the tunnel: {0}")]
    HeadTooLarge(#[source] CodecError),
}

/// Response delivered to every call pending when its tunnel dies.
pub fn tunnel_closed() -> Response<Bytes> {
    protocol::text_response(StatusCode::BAD_GATEWAY, TUNNEL_CLOSED_BODY)
}

/// Handle to one live tunnel, shared by the registry and in-flight calls.
#[derive(Debug)]
pub struct TunnelMux {
    id: ConnectionId,
    session_id: String,
    peer_addr: Option<SocketAddr>,
    connected_at: Instant,
    outbound: mpsc::Sender<Request<Bytes>>,
    pending: Arc<PendingCalls>,
    request_timeout: Option<Duration>,
}

/// Owns the socket side of a tunnel. Consumed by [`TunnelDriver::run`].
#[derive(Debug)]
pub struct TunnelDriver {
    id: ConnectionId,
    session_id: String,
    outbound: mpsc::Receiver<Request<Bytes>>,
    pending: Arc<PendingCalls>,
}

impl TunnelMux {
    /// Create the handle and its driver for a tunnel serving `session_id`.
    pub fn new(
        session_id: impl Into<String>,
        peer_addr: Option<SocketAddr>,
        request_timeout: Option<Duration>,
    ) -> (Arc<Self>, TunnelDriver) {
        let id = ConnectionId::new();
        let session_id = session_id.into();
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let pending = Arc::new(PendingCalls::new());

        let mux = Arc::new(Self {
            id,
            session_id: session_id.clone(),
            peer_addr,
            connected_at: Instant::now(),
            outbound: tx,
            pending: Arc::clone(&pending),
            request_timeout,
        });
        let driver = TunnelDriver {
            id,
            session_id,
            outbound: rx,
            pending,
        };
        (mux, driver)
    }

    /// Send `request` through the tunnel and wait for the matching response.
    ///
    /// Safe to call concurrently. Responses may arrive in any order; each
    /// caller receives the one tagged with its own transaction id.
    pub async fn request(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, TunnelError> {
        let tid = Uuid::new_v4().simple().to_string();
        let rx = self.pending.register(&tid).ok_or(TunnelError::Closed)?;
        let _entry = PendingEntry {
            pending: &self.pending,
            tid: &tid,
        };

        if !protocol::set_tid(request.headers_mut(), &tid) {
            return Err(TunnelError::InvalidTid);
        }
        // The peer's decoder would fail the whole tunnel on this frame.
        protocol::check_request_head(&request).map_err(TunnelError::HeadTooLarge)?;

        tracing::debug!(
            connection_id = %self.id,
            session_id = %self.session_id,
            tid = %tid,
            method = %request.method(),
            uri = %request.uri(),
            "Forwarding request into tunnel"
        );

        self.outbound
            .send(request)
            .await
            .map_err(|_| TunnelError::Closed)?;

        let response = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| TunnelError::Timeout(limit))?,
            None => rx.await,
        };
        response.map_err(|_| TunnelError::Closed)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Time since the tunnel was established.
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// True once the tunnel has been torn down.
    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }
}

/// Removes a call's entry when the call ends without a delivery
/// (timeout, failed write, or the caller being dropped).
struct PendingEntry<'a> {
    pending: &'a PendingCalls,
    tid: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.tid);
    }
}

impl TunnelDriver {
    /// Run the send and receive loops over `framed` until the peer goes
    /// away, a frame cannot be decoded, a write fails, or `shutdown` fires.
    ///
    /// Every call still pending afterwards is answered with a 502
    /// [`tunnel_closed`] response.
    pub async fn run<S>(
        self,
        framed: Framed<S, TunnelCodec<Response<Bytes>>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let TunnelDriver {
            id,
            session_id,
            mut outbound,
            pending,
        } = self;
        let (mut sink, mut stream) = framed.split::<Request<Bytes>>();

        let receive = async {
            while let Some(frame) = stream.next().await {
                let mut response = frame?;
                let Some(tid) = protocol::take_tid(response.headers_mut()) else {
                    tracing::warn!(
                        connection_id = %id,
                        session_id = %session_id,
                        status = %response.status(),
                        "Dropping tunnel response without transaction id"
                    );
                    continue;
                };
                if !pending.resolve(&tid, response) {
                    tracing::debug!(
                        connection_id = %id,
                        tid = %tid,
                        "Dropping tunnel response with no waiting call"
                    );
                }
            }
            Ok::<_, TunnelError>(())
        };

        let send = async {
            while let Some(request) = outbound.recv().await {
                sink.send(request).await?;
            }
            Ok::<_, TunnelError>(())
        };

        let outcome = tokio::select! {
            result = receive => result,
            result = send => result,
            _ = shutdown.recv() => {
                tracing::debug!(connection_id = %id, "Tunnel stopping for shutdown");
                Ok(())
            }
        };

        let failed = pending.fail_all(tunnel_closed);
        metrics::record_pending_failed(failed);

        match &outcome {
            Ok(()) => tracing::info!(
                connection_id = %id,
                session_id = %session_id,
                failed_calls = failed,
                "Tunnel closed"
            ),
            Err(e) => tracing::warn!(
                connection_id = %id,
                session_id = %session_id,
                failed_calls = failed,
                error = %e,
                "Tunnel lost"
            ),
        }
        outcome
    }
}
