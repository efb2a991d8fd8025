//! Front-end HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! Caller request (Session-Id header)
//!     → server.rs (Axum setup, request id, trace, body limit)
//!     → request.rs (buffer body into a tunnel request)
//!     → SessionRegistry lookup → TunnelMux::request()
//!     → response.rs (strip hop-by-hop headers)
//!     → Send to caller
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::HttpServer;
