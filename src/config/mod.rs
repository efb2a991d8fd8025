//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig / ClientConfig (validated, immutable)
//!     → passed by value or reference into the components that need it
//! ```
//!
//! # Design Decisions
//! - Config is loaded once at startup; there is no ambient global
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BackendConfig, ClientConfig, ClientTlsConfig, ListenerConfig,
    ObservabilityConfig, ReconnectConfig, RuntimeConfig, SecurityConfig, ServerConfig,
    ServerEndpointConfig, TimeoutConfig, TlsConfig, TunnelConfig, DEFAULT_MAX_FRAME_BYTES,
};
pub use validation::{Validate, ValidationError};
