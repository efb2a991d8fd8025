//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming tunnel connection (server)
//!     → listener.rs (accept loop, tunnel limit)
//!     → keepalive.rs (dead-peer detection)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (identity, live-tunnel tracking)
//!     → Hand off to tunnel acceptor
//!
//! Outgoing tunnel connection (client)
//!     → resolve + TCP connect
//!     → keepalive.rs
//!     → tls.rs (connector, verification hook)
//!     → Hand off to client lifecycle
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Keep-alive is applied on both ends with the same parameters
//! - Certificate policy is a parameter, not hard-coded

pub mod connection;
pub mod keepalive;
pub mod listener;
pub mod tls;
