//! Client side of the tunnel.
//!
//! # Data Flow
//! ```text
//! health.rs (timer) ──▶ lifecycle.rs (resolve → connect → TLS → setup)
//!                           │
//!                           ▼ receive loop
//!                       dispatcher.rs (one task per request, fresh backend connection)
//!                           │
//!                           ▼
//!                       outbound.rs (FIFO) ──▶ single send loop ──▶ tunnel
//! ```
//!
//! `status.rs` owns the connection status; every component reads it, only
//! the lifecycle writes it.

pub mod dispatcher;
pub mod health;
pub mod lifecycle;
pub mod outbound;
pub mod status;

pub use health::ReconnectMonitor;
pub use lifecycle::{ClientError, TunnelClient};
pub use status::{ConnectionStatus, StatusCallback};
