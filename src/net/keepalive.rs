//! TCP keep-alive for tunnel-carrying sockets.
//!
//! Both ends of a tunnel enable keep-alive so a silently vanished peer is
//! detected within roughly `IDLE + INTERVAL * RETRIES` instead of hanging the
//! read loop for hours.

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Idle time before the first probe.
pub const KEEPALIVE_IDLE: Duration = Duration::from_secs(20);

/// Time between unanswered probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

/// Unanswered probes before the connection is dropped.
pub const KEEPALIVE_RETRIES: u32 = 3;

fn keepalive_params() -> TcpKeepalive {
    let params = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
    ))]
    let params = params.with_retries(KEEPALIVE_RETRIES);

    params
}

/// Enable keep-alive on `stream`.
///
/// Failure is logged and otherwise ignored: the tunnel still works, it just
/// detects dead peers later.
pub fn apply(stream: &TcpStream) {
    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive_params()) {
        tracing::warn!(error = %e, "Failed to enable TCP keep-alive");
    }
}
