//! Waits for out-of-band responses arriving on the persistent connection.
//!
//! A caller on the request/response HTTP surface triggers an action whose
//! result comes back later as a server event. Each wait registers a pending
//! entry under a response key; the connection event loop completes the
//! oldest pending entry for the matching key, so concurrent requests of the
//! same kind resolve in FIFO order instead of racing over a shared slot.

use palaver_types::Target;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Observed response-arrival bounds for each request kind.
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(6);
pub const CHECK_USER_TIMEOUT: Duration = Duration::from_secs(3);

/// Which server event completes a pending wait.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResponseKey {
    /// `history_loaded` for a specific target.
    History(String),
    /// `client_check_user_result`.
    CheckUser,
}

impl ResponseKey {
    pub fn history(target: &Target) -> Self {
        Self::History(target.as_str().to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("timed out waiting for response")]
    Timeout,
    #[error("connection closed before response arrived")]
    Closed,
}

/// A registered wait; completed by the event loop or abandoned on timeout.
pub struct Pending {
    id: u64,
    key: ResponseKey,
    rx: oneshot::Receiver<serde_json::Value>,
}

#[derive(Default)]
pub struct Bridge {
    next_id: AtomicU64,
    pending: Mutex<HashMap<ResponseKey, VecDeque<(u64, oneshot::Sender<serde_json::Value>)>>>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<
        '_,
        HashMap<ResponseKey, VecDeque<(u64, oneshot::Sender<serde_json::Value>)>>,
    > {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a wait. Must happen *before* the triggering event is
    /// emitted, or a fast response could arrive with nobody to complete.
    pub fn register(&self, key: ResponseKey) -> Pending {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().entry(key.clone()).or_default().push_back((id, tx));
        Pending { id, key, rx }
    }

    /// Completes the oldest pending wait for a key. Returns false when
    /// nothing was waiting (an unsolicited event, not an error).
    pub fn complete(&self, key: &ResponseKey, value: serde_json::Value) -> bool {
        let mut pending = self.lock();
        let Some(queue) = pending.get_mut(key) else {
            return false;
        };
        let Some((_, tx)) = queue.pop_front() else {
            return false;
        };
        if queue.is_empty() {
            pending.remove(key);
        }
        // The waiter may have timed out already; that is fine.
        tx.send(value).is_ok()
    }

    /// Abandons every pending wait, failing the waiters. Called when the
    /// connection drops so callers do not run out their full timeout.
    pub fn fail_all(&self) {
        self.lock().clear();
    }

    /// Awaits a registered response with a bounded timeout, removing the
    /// entry when the wait is abandoned. Holds no lock while waiting.
    pub async fn wait(&self, pending: Pending, timeout: Duration) -> Result<serde_json::Value, BridgeError> {
        let Pending { id, key, rx } = pending;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                let mut table = self.lock();
                if let Some(queue) = table.get_mut(&key) {
                    queue.retain(|(entry_id, _)| *entry_id != id);
                    if queue.is_empty() {
                        table.remove(&key);
                    }
                }
                Err(BridgeError::Timeout)
            }
        }
    }
}
