//! Client connection status and change notification.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::observability::metrics;

/// Where the client is in its connect sequence.
///
/// Transitions go Disconnected → Resolving → Connecting → Connected; a
/// failure at any step goes straight back to Disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Resolving,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Resolving => "resolving",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoked with the new status after every change.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

/// Identifies one connect attempt. Only the current attempt may move the
/// status; a stopped or superseded attempt's updates are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt(u64);

/// Owns the client status. Changes are published on a watch channel and
/// passed to the optional callback, outside any lock.
///
/// The attempt counter is only read or written inside `send_if_modified`,
/// so checks against it are serialised by the channel's lock.
pub struct StatusNotifier {
    tx: watch::Sender<ConnectionStatus>,
    attempt: AtomicU64,
    callback: Option<StatusCallback>,
}

impl StatusNotifier {
    pub fn new(callback: Option<StatusCallback>) -> Self {
        let (tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            tx,
            attempt: AtomicU64::new(0),
            callback,
        }
    }

    pub fn get(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    /// Atomically move Disconnected → Resolving and open a new attempt.
    ///
    /// Returns `None` if an attempt or session is already under way.
    pub fn begin_attempt(&self) -> Option<Attempt> {
        let mut started = None;
        self.tx.send_if_modified(|current| {
            if *current != ConnectionStatus::Disconnected {
                return false;
            }
            *current = ConnectionStatus::Resolving;
            started = Some(Attempt(self.attempt.fetch_add(1, Ordering::Relaxed) + 1));
            true
        });
        if started.is_some() {
            self.notify(ConnectionStatus::Resolving);
        }
        started
    }

    /// Move to `status` on behalf of `attempt`.
    ///
    /// Returns false, and notifies nobody, if `attempt` is no longer current
    /// or the status was already `status`.
    pub fn advance(&self, attempt: Attempt, status: ConnectionStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if self.attempt.load(Ordering::Relaxed) != attempt.0 || *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            self.notify(status);
        }
        changed
    }

    /// Retire the current attempt and move to Disconnected.
    pub fn reset(&self) {
        let changed = self.tx.send_if_modified(|current| {
            self.attempt.fetch_add(1, Ordering::Relaxed);
            if *current == ConnectionStatus::Disconnected {
                return false;
            }
            *current = ConnectionStatus::Disconnected;
            true
        });
        if changed {
            self.notify(ConnectionStatus::Disconnected);
        }
    }

    fn notify(&self, status: ConnectionStatus) {
        tracing::debug!(status = %status, "Tunnel client status changed");
        metrics::record_status_change(status.as_str());
        if let Some(callback) = &self.callback {
            callback(status);
        }
    }
}

impl fmt::Debug for StatusNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusNotifier")
            .field("status", &self.get())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (StatusNotifier, Arc<Mutex<Vec<ConnectionStatus>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let notifier = StatusNotifier::new(Some(Arc::new(move |status: ConnectionStatus| sink.lock().unwrap().push(status))));
        (notifier, seen)
    }

    #[test]
    fn callback_sees_each_change_once() {
        let (notifier, seen) = recording();
        let attempt = notifier.begin_attempt().unwrap();
        assert!(notifier.advance(attempt, ConnectionStatus::Connecting));
        assert!(notifier.advance(attempt, ConnectionStatus::Connected));
        assert!(notifier.advance(attempt, ConnectionStatus::Disconnected));
        assert!(!notifier.advance(attempt, ConnectionStatus::Disconnected));

        assert_eq!(
            *seen.lock().unwrap(),
            [
                ConnectionStatus::Resolving,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
            ]
        );
    }

    #[test]
    fn attempt_only_starts_from_disconnected() {
        let (notifier, _) = recording();
        let attempt = notifier.begin_attempt().unwrap();
        assert!(notifier.begin_attempt().is_none());
        notifier.advance(attempt, ConnectionStatus::Connected);
        assert!(notifier.begin_attempt().is_none());
        notifier.advance(attempt, ConnectionStatus::Disconnected);
        assert!(notifier.begin_attempt().is_some());
    }

    #[test]
    fn stopped_attempt_cannot_publish() {
        let (notifier, seen) = recording();
        let stale = notifier.begin_attempt().unwrap();
        notifier.reset();

        // A task still finishing the stopped attempt must not revive it.
        assert!(!notifier.advance(stale, ConnectionStatus::Connected));
        assert_eq!(notifier.get(), ConnectionStatus::Disconnected);

        // Nor may it knock down its successor.
        let fresh = notifier.begin_attempt().unwrap();
        assert_ne!(fresh, stale);
        assert!(notifier.advance(fresh, ConnectionStatus::Connecting));
        assert!(!notifier.advance(stale, ConnectionStatus::Disconnected));
        assert_eq!(notifier.get(), ConnectionStatus::Connecting);

        assert_eq!(
            *seen.lock().unwrap(),
            [
                ConnectionStatus::Resolving,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Resolving,
                ConnectionStatus::Connecting,
            ]
        );
    }

    #[test]
    fn reset_when_idle_notifies_nobody() {
        let (notifier, seen) = recording();
        notifier.reset();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn watchers_observe_changes() {
        let notifier = StatusNotifier::new(None);
        let mut rx = notifier.subscribe();
        notifier.begin_attempt().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionStatus::Resolving);
        assert_eq!(notifier.get(), ConnectionStatus::Resolving);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(ConnectionStatus::Resolving.to_string(), "resolving");
    }
}
