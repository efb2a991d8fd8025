//! Session id → live tunnel mapping.
//!
//! One lock guards every operation and is never held across an await.
//! Registration is last-writer-wins; removal is identity-checked so a dying
//! tunnel cannot evict the tunnel that superseded it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use super::mux::TunnelMux;

/// Point-in-time view of one registered tunnel.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelInfo {
    pub session_id: String,
    pub connection_id: String,
    pub peer_addr: Option<SocketAddr>,
    pub pending_calls: usize,
    pub connected_secs: u64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    tunnels: Mutex<HashMap<String, Arc<TunnelMux>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tunnel` under its session id, replacing any previous entry.
    ///
    /// The replaced tunnel, if any, is returned and keeps running until its
    /// own connection ends.
    pub fn add(&self, tunnel: Arc<TunnelMux>) -> Option<Arc<TunnelMux>> {
        let previous = self
            .lock()
            .insert(tunnel.session_id().to_string(), Arc::clone(&tunnel));

        if let Some(old) = &previous {
            tracing::warn!(
                session_id = %tunnel.session_id(),
                old_connection = %old.id(),
                new_connection = %tunnel.id(),
                "Session id re-registered, newer tunnel takes over"
            );
        }
        previous
    }

    /// Current tunnel for `session_id`.
    ///
    /// The tunnel may die right after lookup; its calls then fail with a
    /// closed-tunnel response rather than hang.
    pub fn find(&self, session_id: &str) -> Option<Arc<TunnelMux>> {
        self.lock().get(session_id).cloned()
    }

    /// Remove `tunnel` if it is still the registered tunnel for its session.
    ///
    /// Returns true if an entry was removed.
    pub fn remove(&self, tunnel: &Arc<TunnelMux>) -> bool {
        let mut tunnels = self.lock();
        match tunnels.get(tunnel.session_id()) {
            Some(current) if Arc::ptr_eq(current, tunnel) => {
                tunnels.remove(tunnel.session_id());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Describe every registered tunnel, ordered by session id.
    pub fn snapshot(&self) -> Vec<TunnelInfo> {
        let tunnels: Vec<Arc<TunnelMux>> = self.lock().values().cloned().collect();

        let mut infos: Vec<TunnelInfo> = tunnels
            .iter()
            .map(|tunnel| TunnelInfo {
                session_id: tunnel.session_id().to_string(),
                connection_id: tunnel.id().to_string(),
                peer_addr: tunnel.peer_addr(),
                pending_calls: tunnel.pending_calls(),
                connected_secs: tunnel.connected_for().as_secs(),
            })
            .collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<TunnelMux>>> {
        self.tunnels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
