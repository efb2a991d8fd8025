//! Per-tunnel table of calls awaiting their response.
//!
//! Every entry has exactly one removal path: delivery by the receive loop,
//! cancellation by its own caller (timeout or failed write), or teardown.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use http::Response;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct PendingState {
    calls: HashMap<String, oneshot::Sender<Response<Bytes>>>,
    closed: bool,
}

/// Outstanding calls of one tunnel, keyed by TID.
#[derive(Debug, Default)]
pub struct PendingCalls {
    state: Mutex<PendingState>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `tid`.
    ///
    /// Returns `None` once the table is closed, or if `tid` is already
    /// outstanding.
    pub fn register(&self, tid: &str) -> Option<oneshot::Receiver<Response<Bytes>>> {
        let mut state = self.lock();
        if state.closed || state.calls.contains_key(tid) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(tid.to_string(), tx);
        Some(rx)
    }

    /// Deliver `response` to the waiter for `tid`.
    ///
    /// Returns false when no call is waiting on `tid`.
    pub fn resolve(&self, tid: &str, response: Response<Bytes>) -> bool {
        let Some(tx) = self.lock().calls.remove(tid) else {
            return false;
        };
        // The waiter may have gone away between removal and send.
        tx.send(response).is_ok()
    }

    /// Drop the entry for `tid` without resolving it.
    pub fn cancel(&self, tid: &str) {
        self.lock().calls.remove(tid);
    }

    /// Close the table and resolve every outstanding call with a response
    /// built by `failure`. Returns the number of calls failed.
    pub fn fail_all<F>(&self, failure: F) -> usize
    where
        F: Fn() -> Response<Bytes>,
    {
        let calls = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.calls)
        };

        let count = calls.len();
        for (_, tx) in calls {
            let _ = tx.send(failure());
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingState> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
