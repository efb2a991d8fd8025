//! Front-end request handling.
//!
//! # Responsibilities
//! - Expose the request ID set by the request-id layer
//! - Buffer the caller's body into a request the tunnel can carry

use axum::body::Body;
use bytes::Bytes;
use http::header::HeaderName;
use http::Request;

/// Header carrying the per-call request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Access to the request ID assigned by the request-id layer.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }
}

/// Collect the body of `request`, up to `limit` bytes.
///
/// Method, URI and headers are forwarded unchanged; the codec rewrites
/// framing headers on the way out.
pub async fn into_tunnel_request(request: Request<Body>, limit: usize) -> Result<Request<Bytes>, axum::Error> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, limit).await?;
    Ok(Request::from_parts(parts, body))
}
