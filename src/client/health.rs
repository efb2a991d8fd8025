//! Reconnect timer.
//!
//! # Responsibilities
//! - Periodically check the client's connection status
//! - Start a new connect attempt whenever the client is Disconnected

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use super::lifecycle::TunnelClient;
use super::status::ConnectionStatus;
use crate::lifecycle::Shutdown;

pub struct ReconnectMonitor {
    client: Arc<TunnelClient>,
    interval: Duration,
}

impl ReconnectMonitor {
    pub fn new(client: Arc<TunnelClient>, interval: Duration) -> Self {
        Self { client, interval }
    }

    /// Run until `shutdown` fires, then stop the client.
    ///
    /// The first check happens immediately, so this also makes the initial
    /// connection.
    pub async fn run(self, shutdown: Shutdown) {
        let mut stop = shutdown.subscribe();

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Reconnect monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.client.status() == ConnectionStatus::Disconnected {
                        tracing::debug!("Tunnel disconnected, starting connect attempt");
                        self.client.start_session();
                    }
                }
                _ = stop.recv() => {
                    tracing::info!("Reconnect monitor received shutdown signal, exiting loop");
                    self.client.stop();
                    break;
                }
            }
        }
    }
}
