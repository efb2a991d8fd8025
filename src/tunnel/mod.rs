//! Server side of the tunnel.
//!
//! # Data Flow
//! ```text
//! tunnel client ──▶ acceptor.rs (setup handshake)
//!                      → registry.rs (session id → tunnel, last writer wins)
//!                      → mux.rs (driver owns the socket)
//!
//! front-end ──▶ registry.find(session id) ──▶ TunnelMux::request()
//!                      → pending.rs (TID → waiting caller)
//! ```

pub mod acceptor;
pub mod mux;
pub mod pending;
pub mod registry;

pub use acceptor::TunnelAcceptor;
pub use mux::{TunnelError, TunnelMux};
pub use registry::{SessionRegistry, TunnelInfo};
