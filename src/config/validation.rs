//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, ports valid)
//! - Check addresses parse before any socket is bound
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure: config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AdminConfig, ClientConfig, RuntimeConfig, ServerConfig};

/// A single failed check, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Semantic checks run after deserialization.
pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        check_socket_addr(&mut errors, "listener.bind_address", &self.listener.bind_address);
        check_socket_addr(&mut errors, "tunnel.bind_address", &self.tunnel.bind_address);

        if self.tunnel.max_tunnels == 0 {
            errors.push(ValidationError::new("tunnel.max_tunnels", "must be greater than zero"));
        }
        if self.tunnel.max_frame_bytes == 0 {
            errors.push(ValidationError::new("tunnel.max_frame_bytes", "must be greater than zero"));
        }
        if let Some(tls) = &self.tunnel.tls {
            if tls.cert_path.is_empty() {
                errors.push(ValidationError::new("tunnel.tls.cert_path", "must not be empty"));
            }
            if tls.key_path.is_empty() {
                errors.push(ValidationError::new("tunnel.tls.key_path", "must not be empty"));
            }
        }
        if self.security.max_body_size == 0 {
            errors.push(ValidationError::new("security.max_body_size", "must be greater than zero"));
        }
        if self.observability.metrics_enabled {
            check_socket_addr(
                &mut errors,
                "observability.metrics_address",
                &self.observability.metrics_address,
            );
        }

        check_runtime(&mut errors, &self.runtime);
        check_admin(&mut errors, &self.admin);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for ClientConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.server.host.is_empty() {
            errors.push(ValidationError::new("server.host", "must not be empty"));
        }
        if self.server.port == 0 {
            errors.push(ValidationError::new("server.port", "must not be zero"));
        }
        if self.server.session_id.is_empty() {
            errors.push(ValidationError::new("server.session_id", "must not be empty"));
        }
        if self.server.max_frame_bytes == 0 {
            errors.push(ValidationError::new("server.max_frame_bytes", "must be greater than zero"));
        }
        check_socket_addr(&mut errors, "backend.address", &self.backend.address);
        if self.backend.max_response_bytes == 0 {
            errors.push(ValidationError::new(
                "backend.max_response_bytes",
                "must be greater than zero",
            ));
        }
        if self.reconnect.interval_secs == 0 {
            errors.push(ValidationError::new("reconnect.interval_secs", "must be greater than zero"));
        }
        if matches!(&self.tls.ca_cert_path, Some(path) if path.is_empty()) {
            errors.push(ValidationError::new("tls.ca_cert_path", "must not be empty when set"));
        }

        check_runtime(&mut errors, &self.runtime);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if let Err(e) = value.parse::<SocketAddr>() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}': {}", value, e)));
    }
}

fn check_runtime(errors: &mut Vec<ValidationError>, runtime: &RuntimeConfig) {
    if runtime.worker_threads == 0 {
        errors.push(ValidationError::new("runtime.worker_threads", "must be greater than zero"));
    }
}

fn check_admin(errors: &mut Vec<ValidationError>, admin: &AdminConfig) {
    if !admin.enabled {
        return;
    }
    if admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }
    check_socket_addr(errors, "admin.bind_address", &admin.bind_address);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn default_server_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn collects_every_server_error() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.tunnel.max_tunnels = 0;
        config.tunnel.tls = Some(TlsConfig {
            cert_path: String::new(),
            key_path: "key.pem".into(),
        });
        config.runtime.worker_threads = 0;

        let errors = config.validate().unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "tunnel.max_tunnels",
                "tunnel.tls.cert_path",
                "runtime.worker_threads",
            ]
        );
    }

    #[test]
    fn client_requires_session_id() {
        let config = ClientConfig::default();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "server.session_id"));
    }

    #[test]
    fn client_with_session_id_is_valid() {
        let mut config = ClientConfig::default();
        config.server.session_id = "s1".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn admin_checked_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.admin.api_key = String::new();
        assert!(config.validate().is_ok());

        config.admin.enabled = true;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors[0].to_string(), "admin.api_key: must not be empty when admin is enabled");
    }
}
