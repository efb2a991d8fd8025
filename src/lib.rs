//! Reverse HTTP tunnel.
//!
//! A public server accepts HTTP calls tagged with a session id and forwards
//! them over a long-lived tunnel to a client that dialed in from behind a
//! NAT; the client proxies each call to its local backend and ships the
//! response back over the same connection.

// Core subsystems
pub mod config;
pub mod protocol;
pub mod net;
pub mod tunnel;
pub mod client;
pub mod http;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;

pub use crate::client::{ConnectionStatus, TunnelClient};
pub use crate::config::{ClientConfig, ServerConfig};
pub use crate::http::HttpServer;
pub use crate::lifecycle::Shutdown;
pub use crate::tunnel::{SessionRegistry, TunnelAcceptor, TunnelMux};
