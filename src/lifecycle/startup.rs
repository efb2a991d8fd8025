//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Bind every listener before serving any traffic
//! - Run the components until shutdown
//!
//! Configuration is loaded and validated by the caller.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;

use super::Shutdown;
use crate::admin::{self, AdminState};
use crate::client::{ReconnectMonitor, TunnelClient};
use crate::config::{ClientConfig, ObservabilityConfig, ServerConfig};
use crate::http::HttpServer;
use crate::net::tls;
use crate::observability::metrics;
use crate::tunnel::{SessionRegistry, TunnelAcceptor};

fn start_metrics(config: &ObservabilityConfig) {
    if !config.metrics_enabled {
        return;
    }
    match config.metrics_address.parse() {
        Ok(addr) => metrics::init_metrics(addr),
        Err(_) => tracing::error!(
            metrics_address = %config.metrics_address,
            "Failed to parse metrics address"
        ),
    }
}

/// Run the tunnel server: front-end, tunnel acceptor and optional admin API.
pub async fn run_server(config: ServerConfig, shutdown: Shutdown) -> Result<(), Box<dyn Error>> {
    start_metrics(&config.observability);

    let registry = Arc::new(SessionRegistry::new());

    let tls = match &config.tunnel.tls {
        Some(tls_config) => {
            let acceptor = tls::load_acceptor(Path::new(&tls_config.cert_path), Path::new(&tls_config.key_path)).await?;
            tracing::info!(cert_path = %tls_config.cert_path, "Tunnel TLS enabled");
            Some(acceptor)
        }
        None => None,
    };

    let acceptor = TunnelAcceptor::bind(&config, Arc::clone(&registry), tls).await?;
    let tracker = acceptor.tracker();

    let front_listener = TcpListener::bind(&config.listener.bind_address).await?;

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            registry: Arc::clone(&registry),
            tracker,
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        Some(tokio::spawn(admin::serve_admin(listener, state, shutdown.clone())))
    } else {
        None
    };

    let acceptor_task = tokio::spawn(acceptor.run(shutdown.clone()));

    HttpServer::new(&config, registry)
        .run(front_listener, shutdown.clone())
        .await?;

    if let Err(e) = acceptor_task.await {
        tracing::error!(error = %e, "Tunnel acceptor task failed");
    }
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task failed"),
            Ok(Ok(())) => {}
        }
    }
    Ok(())
}

/// Run the tunnel client until shutdown.
pub async fn run_client(config: ClientConfig, shutdown: Shutdown) -> Result<(), Box<dyn Error>> {
    start_metrics(&config.observability);

    tracing::info!(
        server = %format!("{}:{}", config.server.host, config.server.port),
        session_id = %config.server.session_id,
        backend = %config.backend.address,
        tls = config.tls.enabled,
        "Tunnel client starting"
    );

    let interval = config.reconnect.interval();
    let client = Arc::new(TunnelClient::new(config));
    ReconnectMonitor::new(client, interval).run(shutdown).await;
    Ok(())
}
