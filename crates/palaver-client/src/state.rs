//! Shared client-side state, updated by the connection event loop and read
//! by the local HTTP surface.

use palaver_types::UserSummary;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Notifications kept in memory for the UI to poll.
const NOTIFICATION_BACKLOG: usize = 64;

/// The verified identity, persisted to `profile.json` so the next run can
/// reauthenticate by token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub uid: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Default)]
struct Inner {
    connected: bool,
    profile: Option<Profile>,
    last_code: Option<String>,
    roster: Vec<UserSummary>,
    notifications: VecDeque<String>,
}

/// Mutex-guarded client state. Lock acquisitions are brief field updates
/// that never span `.await` points.
#[derive(Default)]
pub struct ClientState {
    inner: Mutex<Inner>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn connected(&self) -> bool {
        self.lock().connected
    }

    /// Installs a verified identity. A profile update re-announcement
    /// carries no token; the cached one is kept so reauth keeps working.
    pub fn set_profile(&self, username: String, uid: String, avatar: String, token: Option<String>) {
        let mut inner = self.lock();
        let token = token.or_else(|| inner.profile.as_ref().and_then(|p| p.token.clone()));
        inner.profile = Some(Profile {
            username,
            uid,
            avatar,
            token,
        });
    }

    pub fn clear_profile(&self) {
        self.lock().profile = None;
    }

    pub fn profile(&self) -> Option<Profile> {
        self.lock().profile.clone()
    }

    pub fn set_last_code(&self, code: String) {
        self.lock().last_code = Some(code);
    }

    pub fn last_code(&self) -> Option<String> {
        self.lock().last_code.clone()
    }

    pub fn set_roster(&self, roster: Vec<UserSummary>) {
        self.lock().roster = roster;
    }

    pub fn roster(&self) -> Vec<UserSummary> {
        self.lock().roster.clone()
    }

    pub fn push_notification(&self, msg: String) {
        let mut inner = self.lock();
        if inner.notifications.len() == NOTIFICATION_BACKLOG {
            inner.notifications.pop_front();
        }
        inner.notifications.push_back(msg);
    }

    pub fn notifications(&self) -> Vec<String> {
        self.lock().notifications.iter().cloned().collect()
    }
}
