//! Response conversion for the front-end.
//!
//! # Responsibilities
//! - Turn a tunnel response into a caller response
//! - Strip hop-by-hop headers that describe the tunnel connection
//! - Build plain-text error responses

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{HeaderName, CONNECTION, TRANSFER_ENCODING};
use http::StatusCode;

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Return a tunnel response to the caller, status and body unchanged.
pub fn from_tunnel(response: http::Response<Bytes>) -> Response {
    let (mut parts, body) = response.into_parts();
    parts.headers.remove(CONNECTION);
    parts.headers.remove(KEEP_ALIVE);
    parts.headers.remove(TRANSFER_ENCODING);
    Response::from_parts(parts, Body::from(body))
}

pub fn error_response(status: StatusCode, message: &'static str) -> Response {
    (status, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_status_and_body_drops_connection_headers() {
        let response = http::Response::builder()
            .status(StatusCode::CREATED)
            .header(CONNECTION, "keep-alive")
            .header("x-backend", "1")
            .body(Bytes::from_static(b"made"))
            .unwrap();

        let response = from_tunnel(response);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(CONNECTION).is_none());
        assert_eq!(response.headers()["x-backend"], "1");

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), b"made");
    }
}
