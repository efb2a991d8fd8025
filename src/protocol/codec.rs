//! HTTP/1.1 frame codec for the tunnel byte stream.
//!
//! # Responsibilities
//! - Decode one complete request or response (head + body) per frame
//! - Encode requests and responses with an authoritative `Content-Length`
//! - Bound head and body sizes so a misbehaving peer cannot exhaust memory
//!
//! # Design Decisions
//! - Bodies are always length-delimited; chunked frames are rejected because
//!   both ends of the tunnel always write `Content-Length`
//! - A decode error is fatal to the connection: once framing is lost the
//!   stream cannot be re-synchronised
//! - `TunnelCodec<M>` decodes `M` and can encode either message kind, so one
//!   `Framed` covers both the setup exchange and the steady state via
//!   `Framed::map_codec`

use std::fmt::Write as _;
use std::marker::PhantomData;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum number of headers in one frame.
pub const MAX_HEADERS: usize = 64;

/// Maximum size of a frame head (start line + headers).
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Errors raised while framing tunnel traffic.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed HTTP head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("frame head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("frame carries more than {0} headers")]
    TooManyHeaders(usize),

    #[error("frame body of {len} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { len: usize, limit: usize },

    #[error("invalid content-length")]
    InvalidContentLength,

    #[error("transfer-encoding is not supported on tunnel frames")]
    TransferEncoding,

    #[error("invalid method")]
    InvalidMethod,

    #[error("invalid request target: {0}")]
    InvalidTarget(String),

    #[error("invalid status code")]
    InvalidStatus,

    #[error("invalid header")]
    InvalidHeader,
}

/// Decodes messages of type `M` and encodes requests and responses.
#[derive(Debug)]
pub struct TunnelCodec<M> {
    max_body: usize,
    _message: PhantomData<fn() -> M>,
}

impl<M> TunnelCodec<M> {
    /// Create a codec accepting bodies up to `max_body` bytes.
    pub fn new(max_body: usize) -> Self {
        Self {
            max_body,
            _message: PhantomData,
        }
    }

    pub fn max_body(&self) -> usize {
        self.max_body
    }
}

impl<M> Clone for TunnelCodec<M> {
    fn clone(&self) -> Self {
        Self::new(self.max_body)
    }
}

/// Parsed head fields shared by requests and responses.
struct Head {
    head_len: usize,
    body_len: usize,
    version: Version,
    headers: HeaderMap,
}

fn convert_headers(raw: &[httparse::Header<'_>]) -> Result<(HeaderMap, usize), CodecError> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    let mut body_len = 0usize;

    for header in raw {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| CodecError::InvalidHeader)?;
        let value = HeaderValue::from_bytes(header.value).map_err(|_| CodecError::InvalidHeader)?;

        if name == TRANSFER_ENCODING {
            return Err(CodecError::TransferEncoding);
        }
        if name == CONTENT_LENGTH {
            body_len = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or(CodecError::InvalidContentLength)?;
        }
        headers.append(name, value);
    }

    Ok((headers, body_len))
}

/// Check that `request`, once encoded, passes the head limits the peer's
/// decoder enforces.
pub fn check_request_head(request: &Request<Bytes>) -> Result<(), CodecError> {
    let start_line = request.method().as_str().len() + 1 + request.uri().to_string().len() + " HTTP/1.1\r\n".len();
    check_head(start_line, request.headers(), request.body().len())
}

/// Check that `response`, once encoded, passes the head limits the peer's
/// decoder enforces.
pub fn check_response_head(response: &Response<Bytes>) -> Result<(), CodecError> {
    let reason = response.status().canonical_reason().unwrap_or("");
    let start_line = "HTTP/1.1 000 \r\n".len() + reason.len();
    check_head(start_line, response.headers(), response.body().len())
}

fn check_head(start_line: usize, headers: &HeaderMap, body_len: usize) -> Result<(), CodecError> {
    // content-length is always written by the encoder
    let mut count = 1;
    let mut len = start_line + "content-length: \r\n\r\n".len() + body_len.to_string().len();

    for (name, value) in headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        count += 1;
        len += name.as_str().len() + ": \r\n".len() + value.len();
    }

    if count > MAX_HEADERS {
        return Err(CodecError::TooManyHeaders(MAX_HEADERS));
    }
    if len > MAX_HEAD_BYTES {
        return Err(CodecError::HeadTooLarge(MAX_HEAD_BYTES));
    }
    Ok(())
}

fn version_from(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

impl<M> TunnelCodec<M> {
    /// Check the partial-head bound and the body bound, and reserve room for
    /// the rest of the frame. Returns true once the whole frame is buffered.
    fn frame_ready(&self, src: &mut BytesMut, head: Option<&Head>) -> Result<bool, CodecError> {
        let Some(head) = head else {
            if src.len() > MAX_HEAD_BYTES {
                return Err(CodecError::HeadTooLarge(MAX_HEAD_BYTES));
            }
            return Ok(false);
        };

        if head.body_len > self.max_body {
            return Err(CodecError::BodyTooLarge {
                len: head.body_len,
                limit: self.max_body,
            });
        }

        let frame_len = head.head_len + head.body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(false);
        }
        Ok(true)
    }
}

fn split_body(src: &mut BytesMut, head: &Head) -> Bytes {
    let _ = src.split_to(head.head_len);
    src.split_to(head.body_len).freeze()
}

impl Decoder for TunnelCodec<Request<Bytes>> {
    type Item = Request<Bytes>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let parsed = {
            let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut raw = httparse::Request::new(&mut raw_headers);
            match raw.parse(src)? {
                httparse::Status::Partial => None,
                httparse::Status::Complete(head_len) => {
                    let method = Method::from_bytes(raw.method.unwrap_or_default().as_bytes())
                        .map_err(|_| CodecError::InvalidMethod)?;
                    let target = raw.path.unwrap_or_default();
                    let uri = target
                        .parse::<Uri>()
                        .map_err(|_| CodecError::InvalidTarget(target.to_string()))?;
                    let (headers, body_len) = convert_headers(raw.headers)?;
                    Some((
                        method,
                        uri,
                        Head {
                            head_len,
                            body_len,
                            version: version_from(raw.version),
                            headers,
                        },
                    ))
                }
            }
        };

        if !self.frame_ready(src, parsed.as_ref().map(|(_, _, head)| head))? {
            return Ok(None);
        }
        let Some((method, uri, head)) = parsed else {
            return Ok(None);
        };

        let body = split_body(src, &head);
        let mut request = Request::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = head.version;
        *request.headers_mut() = head.headers;
        Ok(Some(request))
    }
}

impl Decoder for TunnelCodec<Response<Bytes>> {
    type Item = Response<Bytes>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let parsed = {
            let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut raw = httparse::Response::new(&mut raw_headers);
            match raw.parse(src)? {
                httparse::Status::Partial => None,
                httparse::Status::Complete(head_len) => {
                    let status = raw
                        .code
                        .and_then(|code| StatusCode::from_u16(code).ok())
                        .ok_or(CodecError::InvalidStatus)?;
                    let (headers, body_len) = convert_headers(raw.headers)?;
                    Some((
                        status,
                        Head {
                            head_len,
                            body_len,
                            version: version_from(raw.version),
                            headers,
                        },
                    ))
                }
            }
        };

        if !self.frame_ready(src, parsed.as_ref().map(|(_, head)| head))? {
            return Ok(None);
        }
        let Some((status, head)) = parsed else {
            return Ok(None);
        };

        let body = split_body(src, &head);
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = head.version;
        *response.headers_mut() = head.headers;
        Ok(Some(response))
    }
}

fn write_headers(headers: &HeaderMap, body_len: usize, dst: &mut BytesMut) {
    for (name, value) in headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        dst.put_slice(name.as_str().as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    let _ = write!(dst, "content-length: {}\r\n\r\n", body_len);
}

impl<M> Encoder<Request<Bytes>> for TunnelCodec<M> {
    type Error = CodecError;

    fn encode(&mut self, item: Request<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (parts, body) = item.into_parts();
        dst.reserve(256 + body.len());
        let _ = write!(dst, "{} {} HTTP/1.1\r\n", parts.method, parts.uri);
        write_headers(&parts.headers, body.len(), dst);
        dst.put_slice(&body);
        Ok(())
    }
}

impl<M> Encoder<Response<Bytes>> for TunnelCodec<M> {
    type Error = CodecError;

    fn encode(&mut self, item: Response<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (parts, body) = item.into_parts();
        dst.reserve(256 + body.len());
        let _ = write!(
            dst,
            "HTTP/1.1 {} {}\r\n",
            parts.status.as_u16(),
            parts.status.canonical_reason().unwrap_or("")
        );
        write_headers(&parts.headers, body.len(), dst);
        dst.put_slice(&body);
        Ok(())
    }
}
