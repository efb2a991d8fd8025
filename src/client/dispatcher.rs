//! Local backend dispatcher.
//!
//! # Responsibilities
//! - Forward one tunnel request to the local backend on a fresh connection
//! - Turn every failure into a 503 so the waiting caller is always answered
//! - Tag the response with the request's transaction id and enqueue it

use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use http::{Request, Response, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use super::outbound::OutboundQueue;
use crate::config::BackendConfig;
use crate::observability::metrics;
use crate::protocol::{self, CodecError};

/// Why a dispatch fell back to 503.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid backend URI: {0}")]
    Uri(#[from] http::Error),

    #[error("backend request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read backend response: {0}")]
    Body(axum::Error),

    #[error("backend response head too large for the tunnel: {0}")]
    HeadTooLarge(#[from] CodecError),
}

/// Forwards tunnel requests to the configured backend.
///
/// Cheap to clone; every dispatch runs on its own task.
#[derive(Clone)]
pub struct LocalDispatcher {
    client: Client<HttpConnector, Body>,
    backend: String,
    max_response_bytes: usize,
    queue: OutboundQueue,
}

impl LocalDispatcher {
    pub fn new(config: &BackendConfig, queue: OutboundQueue) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        connector.set_nodelay(true);

        // No idle pool: every request gets its own connection.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(connector);

        Self {
            client,
            backend: config.address.clone(),
            max_response_bytes: config.max_response_bytes,
            queue,
        }
    }

    /// Forward `request`, then enqueue the response tagged with `tid`.
    pub async fn dispatch(&self, tid: String, request: Request<Bytes>) {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let outcome = self.forward(request).await.and_then(|mut response| {
            // Tag and mark persistent first so the check sees the head the send loop writes.
            protocol::set_tid(response.headers_mut(), &tid);
            protocol::set_keep_alive(response.headers_mut(), true);
            protocol::check_response_head(&response)?;
            Ok(response)
        });

        let mut response = match outcome {
            Ok(response) => {
                metrics::record_dispatch("ok");
                tracing::debug!(tid = %tid, method = %method, path = %path, status = %response.status(), "Backend responded");
                response
            }
            Err(e) => {
                metrics::record_dispatch("unavailable");
                tracing::warn!(tid = %tid, method = %method, path = %path, backend = %self.backend, error = %e, "Backend unavailable");
                protocol::service_unavailable()
            }
        };

        if !protocol::set_tid(response.headers_mut(), &tid) {
            tracing::warn!(tid = %tid, "Transaction id is not a valid header value");
            return;
        }
        if !self.queue.enqueue(response) {
            tracing::debug!(tid = %tid, "Tunnel session ended before response could be sent");
        }
    }

    /// Send `request` to the backend and collect the full response.
    pub async fn forward(&self, request: Request<Bytes>) -> Result<Response<Bytes>, DispatchError> {
        let (mut parts, body) = request.into_parts();

        let uri = Uri::builder()
            .scheme("http")
            .authority(self.backend.as_str())
            .path_and_query(parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"))
            .build()?;
        parts.uri = uri;
        parts.version = Version::HTTP_11;
        protocol::set_keep_alive(&mut parts.headers, false);
        protocol::set_content_length(&mut parts.headers, body.len());

        let response = self
            .client
            .request(Request::from_parts(parts, Body::from(body)))
            .await?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), self.max_response_bytes)
            .await
            .map_err(DispatchError::Body)?;
        Ok(Response::from_parts(parts, body))
    }
}
