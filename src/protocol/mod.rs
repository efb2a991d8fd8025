//! Tunnel wire protocol.
//!
//! # Data Flow
//! ```text
//! client                                   server
//!   CONNECT setup.tunnel (Session-Id) ───▶
//!                                     ◀─── 200 OK
//!                                     ◀─── GET /status (TID-J: t1)
//!   200 OK (TID-J: t1)                ───▶
//! ```
//!
//! Every frame is an HTTP/1.1 message framed by `Content-Length`
//! (see `codec.rs`). The session id only appears on the setup request; the
//! transaction id appears on every request sent into the tunnel and on the
//! response that answers it.

pub mod codec;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode};

pub use codec::{check_request_head, check_response_head, CodecError, TunnelCodec};

/// Header carrying the session id (setup request and front-end calls).
pub const SESSION_ID_HEADER: HeaderName = HeaderName::from_static("session-id");

/// Header carrying the transaction id of a tunnelled exchange.
pub const TID_HEADER: HeaderName = HeaderName::from_static("tid-j");

/// Request target of the setup request.
pub const SETUP_TARGET: &str = "setup.tunnel";

/// Non-empty session id carried by `headers`, if any.
pub fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Remove the transaction id from `headers` and return it.
pub fn take_tid(headers: &mut HeaderMap) -> Option<String> {
    let value = headers.remove(&TID_HEADER)?;
    match value.to_str() {
        Ok(tid) if !tid.is_empty() => Some(tid.to_string()),
        _ => None,
    }
}

/// Tag `headers` with a transaction id. Returns false if the id is not a
/// valid header value.
pub fn set_tid(headers: &mut HeaderMap, tid: &str) -> bool {
    match HeaderValue::from_str(tid) {
        Ok(value) => {
            headers.insert(TID_HEADER, value);
            true
        }
        Err(_) => false,
    }
}

/// Force persistent (`keep-alive`) or non-persistent (`close`) semantics.
pub fn set_keep_alive(headers: &mut HeaderMap, keep_alive: bool) {
    let value = if keep_alive { "keep-alive" } else { "close" };
    headers.insert(CONNECTION, HeaderValue::from_static(value));
}

/// Set `Content-Length` from the body.
pub fn set_content_length(headers: &mut HeaderMap, len: usize) {
    headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
}

/// Build the tunnel setup request for `session_id`.
pub fn setup_request(session_id: &str) -> Result<Request<Bytes>, http::Error> {
    Request::builder()
        .method(Method::CONNECT)
        .uri(SETUP_TARGET)
        .header(SESSION_ID_HEADER, session_id)
        .header(CONNECTION, "keep-alive")
        .header(CONTENT_LENGTH, 0)
        .body(Bytes::new())
}

/// Successful answer to a setup request.
pub fn setup_accepted() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    set_keep_alive(response.headers_mut(), true);
    response
}

/// Plain-text response with the given status.
pub fn text_response(status: StatusCode, body: &'static str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(body.as_bytes()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Response synthesized when the local backend cannot be reached.
pub fn service_unavailable() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
}
