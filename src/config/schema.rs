//! Configuration schema definitions.
//!
//! This module defines the configuration structures for both ends of the
//! tunnel. All types derive Serde traits for deserialization from config files,
//! and every field has a default so minimal files stay short.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the tunnel server (front-end + tunnel acceptor).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Front-end HTTP listener.
    pub listener: ListenerConfig,

    /// Tunnel-accepting endpoint.
    pub tunnel: TunnelConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Front-end request limits.
    pub security: SecurityConfig,

    /// Worker thread pool.
    pub runtime: RuntimeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Front-end listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3080".to_string(),
        }
    }
}

/// Tunnel endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Bind address for tunnel clients (e.g., "0.0.0.0:3081").
    pub bind_address: String,

    /// Optional TLS configuration. Plain TCP when absent.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrently connected tunnels (backpressure).
    pub max_tunnels: usize,

    /// Largest frame body accepted from a tunnel client.
    pub max_frame_bytes: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3081".to_string(),
            tls: None,
            max_tunnels: 1024,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Default frame body limit: 16 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// TLS configuration for the tunnel listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a front-end call waits for its tunnel response, in seconds.
    /// Zero waits until the response arrives or the tunnel dies.
    pub request_secs: u64,
}

impl TimeoutConfig {
    /// The request bound, or `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_secs > 0).then(|| Duration::from_secs(self.request_secs))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 15 }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum front-end request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// Tokio runtime sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { worker_threads: 3 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:3082".to_string(),
        }
    }
}

/// Root configuration for the tunnel client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Tunnel server to dial.
    pub server: ServerEndpointConfig,

    /// TLS settings for the tunnel connection.
    pub tls: ClientTlsConfig,

    /// Local service that tunnel requests are proxied to.
    pub backend: BackendConfig,

    /// Reconnect timer.
    pub reconnect: ReconnectConfig,

    /// Worker thread pool.
    pub runtime: RuntimeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Where the tunnel client connects and which session it serves.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerEndpointConfig {
    /// Host name or IP of the tunnel server.
    pub host: String,

    /// Tunnel port.
    pub port: u16,

    /// Session id announced during setup.
    pub session_id: String,

    /// Largest frame body accepted from the server.
    pub max_frame_bytes: usize,
}

impl Default for ServerEndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3081,
            session_id: String::new(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Client-side TLS settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientTlsConfig {
    /// Wrap the tunnel in TLS. Must match the server's `tunnel.tls` setting.
    pub enabled: bool,

    /// Verify the server certificate. When false any certificate is trusted.
    pub verify: bool,

    /// PEM bundle of trusted roots. Web PKI roots are used when absent.
    pub ca_cert_path: Option<String>,

    /// Name used for SNI and verification. Defaults to `server.host`.
    pub server_name: Option<String>,
}

impl Default for ClientTlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            verify: true,
            ca_cert_path: None,
            server_name: None,
        }
    }
}

/// Local backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:9000").
    pub address: String,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Largest backend response body forwarded into the tunnel.
    pub max_response_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9000".to_string(),
            connect_timeout_secs: 5,
            max_response_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Reconnect timer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Seconds between connectivity checks.
    pub interval_secs: u64,
}

impl ReconnectConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}
