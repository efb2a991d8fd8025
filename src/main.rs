//! Reverse HTTP tunnel (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────── SERVER ─────────────────────┐
//!  Caller         │  ┌──────────┐   ┌──────────┐   ┌─────────────┐  │
//!  ──────────────▶│─▶│  http    │──▶│ registry │──▶│ tunnel mux  │  │
//!  Session-Id     │  │ frontend │   │          │   │ (TID table) │  │
//!                 │  └──────────┘   └──────────┘   └──────┬──────┘  │
//!                 └───────────────────────────────────────┼─────────┘
//!                                                 tunnel  │ (TLS, keep-alive)
//!                 ┌──────────────────── CLIENT ───────────┼─────────┐
//!                 │  ┌──────────┐   ┌────────────┐   ┌────┴──────┐  │
//!  Local backend ◀│──│dispatcher│◀──│ receive    │◀──│ lifecycle │  │
//!                 │  └────┬─────┘   └────────────┘   └───────────┘  │
//!                 │       └──▶ outbound queue ──▶ send loop ──▶ tunnel
//!                 └─────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use reverse_tunnel::config::{load_config, ClientConfig, ServerConfig};
use reverse_tunnel::lifecycle::signals::shutdown_signal;
use reverse_tunnel::lifecycle::startup::{run_client, run_server};
use reverse_tunnel::lifecycle::Shutdown;
use reverse_tunnel::net::tls::install_crypto_provider;
use reverse_tunnel::observability::logging::init_tracing;

#[derive(Parser)]
#[command(name = "reverse-tunnel", version, about = "Reverse HTTP tunnel server and client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the public server (front-end + tunnel endpoint)
    Server {
        /// Path to the server configuration file
        #[arg(short, long, default_value = "config/server.toml")]
        config: PathBuf,
    },
    /// Run the tunnel client next to the local backend
    Client {
        /// Path to the client configuration file
        #[arg(short, long, default_value = "config/client.toml")]
        config: PathBuf,
    },
}

fn build_runtime(worker_threads: usize) -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
}

/// Forward the first OS signal to every component.
async fn watch_signals(shutdown: Shutdown) {
    shutdown_signal().await;
    shutdown.trigger();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    install_crypto_provider();
    let shutdown = Shutdown::new();

    match cli.command {
        Command::Server { config } => {
            let config: ServerConfig = load_config(&config)?;
            init_tracing(&config.observability.log_level);
            tracing::info!(
                front_end = %config.listener.bind_address,
                tunnel = %config.tunnel.bind_address,
                max_tunnels = config.tunnel.max_tunnels,
                request_timeout_secs = config.timeouts.request_secs,
                "reverse-tunnel server v{} starting",
                env!("CARGO_PKG_VERSION")
            );

            let runtime = build_runtime(config.runtime.worker_threads)?;
            runtime.block_on(async {
                tokio::spawn(watch_signals(shutdown.clone()));
                run_server(config, shutdown).await
            })?;
        }
        Command::Client { config } => {
            let config: ClientConfig = load_config(&config)?;
            init_tracing(&config.observability.log_level);
            tracing::info!("reverse-tunnel client v{} starting", env!("CARGO_PKG_VERSION"));

            let runtime = build_runtime(config.runtime.worker_threads)?;
            runtime.block_on(async {
                tokio::spawn(watch_signals(shutdown.clone()));
                run_client(config, shutdown).await
            })?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
