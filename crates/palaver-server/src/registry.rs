//! The session registry: live connections and their authentication state.
//!
//! One registry instance owns every connection session and the identity
//! directory (uid -> session). All mutation goes through a single mutex so
//! `verify` and `close` for different sessions cannot interleave when a uid
//! is reused rapidly across reconnects; lock acquisitions are brief map
//! operations that never span `.await` points, so a synchronous lock is
//! safe here.

use palaver_types::{Target, UserSummary, MONITOR_NAME, MONITOR_UID};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type SessionId = Uuid;

struct SessionEntry {
    addr: SocketAddr,
    verified: bool,
    username: String,
    uid: String,
    avatar: String,
    monitor: bool,
    sender: mpsc::Sender<String>,
}

/// A point-in-time copy of one session, taken under the registry lock.
#[derive(Clone)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub verified: bool,
    pub username: String,
    pub uid: String,
    pub avatar: String,
    pub monitor: bool,
    pub sender: mpsc::Sender<String>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    /// Identity directory: uid -> the session currently owning it.
    directory: HashMap<String, SessionId>,
}

/// Lock-guarded table of live sessions plus the identity directory.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a new, unverified session. Never fails.
    pub fn open(&self, addr: SocketAddr, sender: mpsc::Sender<String>) -> SessionId {
        let id = Uuid::new_v4();
        self.lock().sessions.insert(
            id,
            SessionEntry {
                addr,
                verified: false,
                username: "Guest".to_string(),
                uid: String::new(),
                avatar: String::new(),
                monitor: false,
                sender,
            },
        );
        id
    }

    /// Promotes a session to verified and installs the identity mapping,
    /// overwriting any prior mapping for that uid (last-writer-wins; the
    /// prior session is left open but loses its directory entry).
    pub fn verify(&self, id: SessionId, username: &str, uid: &str, avatar: &str) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return false;
        };
        entry.verified = true;
        entry.username = username.to_string();
        entry.uid = uid.to_string();
        entry.avatar = avatar.to_string();
        inner.directory.insert(uid.to_string(), id);
        true
    }

    /// Resets a session to an unverified guest without dropping the
    /// connection, so the same socket can log in again. The identity
    /// mapping is removed only if this session still owns it.
    pub fn logout(&self, id: SessionId) {
        let mut inner = self.lock();
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return;
        };
        let uid = std::mem::take(&mut entry.uid);
        entry.verified = false;
        entry.username = "Guest".to_string();
        entry.avatar.clear();
        if !uid.is_empty() && inner.directory.get(&uid) == Some(&id) {
            inner.directory.remove(&uid);
        }
    }

    /// Removes a session entirely. The identity mapping is removed only if
    /// the directory still points at this session, so a stale disconnect
    /// cannot unmap a newer session for the same uid.
    pub fn close(&self, id: SessionId) {
        let mut inner = self.lock();
        let Some(entry) = inner.sessions.remove(&id) else {
            return;
        };
        if !entry.uid.is_empty() && inner.directory.get(&entry.uid) == Some(&id) {
            inner.directory.remove(&entry.uid);
        }
    }

    /// Marks a session as part of the monitoring audience.
    pub fn set_monitor(&self, id: SessionId) {
        if let Some(entry) = self.lock().sessions.get_mut(&id) {
            entry.monitor = true;
        }
    }

    /// Updates the cached profile fields of a verified session.
    pub fn update_profile(&self, id: SessionId, username: &str, avatar: &str) {
        if let Some(entry) = self.lock().sessions.get_mut(&id) {
            entry.username = username.to_string();
            entry.avatar = avatar.to_string();
        }
    }

    pub fn snapshot(&self, id: SessionId) -> Option<SessionSnapshot> {
        let inner = self.lock();
        inner.sessions.get(&id).map(|entry| SessionSnapshot {
            id,
            addr: entry.addr,
            verified: entry.verified,
            username: entry.username.clone(),
            uid: entry.uid.clone(),
            avatar: entry.avatar.clone(),
            monitor: entry.monitor,
            sender: entry.sender.clone(),
        })
    }

    /// The current connection for a uid, if any.
    pub fn lookup(&self, uid: &str) -> Option<SessionId> {
        self.lock().directory.get(uid).copied()
    }

    /// Snapshot of verified users for the "who is online" broadcast. The
    /// monitoring operator is always advertised last, so users can address
    /// it whether or not a monitor is connected.
    pub fn roster(&self) -> Vec<UserSummary> {
        let inner = self.lock();
        let mut roster: Vec<UserSummary> = inner
            .sessions
            .values()
            .filter(|e| e.verified)
            .map(|e| UserSummary {
                username: e.username.clone(),
                uid: e.uid.clone(),
                avatar: e.avatar.clone(),
            })
            .collect();
        roster.sort_by(|a, b| a.uid.cmp(&b.uid));
        roster.push(UserSummary {
            username: MONITOR_NAME.to_string(),
            uid: MONITOR_UID.to_string(),
            avatar: String::new(),
        });
        roster
    }

    /// The uids with a live connection right now.
    pub fn online_uids(&self) -> HashSet<String> {
        self.lock().directory.keys().cloned().collect()
    }

    /// Senders for every connected session.
    pub fn all_senders(&self) -> Vec<mpsc::Sender<String>> {
        self.lock()
            .sessions
            .values()
            .map(|e| e.sender.clone())
            .collect()
    }

    /// Senders for the monitoring audience only.
    pub fn monitor_senders(&self) -> Vec<mpsc::Sender<String>> {
        self.lock()
            .sessions
            .values()
            .filter(|e| e.monitor)
            .map(|e| e.sender.clone())
            .collect()
    }

    /// Resolves the fan-out audience for a message, under one lock so the
    /// snapshot is consistent. Global targets reach every verified session
    /// and every monitor; direct targets reach the sender (echo), the
    /// target's current session if online, and the monitors — each at most
    /// once.
    pub fn fanout_targets(&self, sender: SessionId, target: &Target) -> Vec<mpsc::Sender<String>> {
        let inner = self.lock();
        let mut ids: Vec<SessionId> = Vec::new();
        match target {
            Target::Global => {
                ids.extend(
                    inner
                        .sessions
                        .iter()
                        .filter(|(_, e)| e.verified || e.monitor)
                        .map(|(id, _)| *id),
                );
            }
            Target::Direct(uid) => {
                ids.push(sender);
                if let Some(peer) = inner.directory.get(uid) {
                    if !ids.contains(peer) {
                        ids.push(*peer);
                    }
                }
                for (id, entry) in &inner.sessions {
                    if entry.monitor && !ids.contains(id) {
                        ids.push(*id);
                    }
                }
            }
        }
        ids.into_iter()
            .filter_map(|id| inner.sessions.get(&id).map(|e| e.sender.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn sender() -> mpsc::Sender<String> {
        mpsc::channel(8).0
    }

    #[test]
    fn verify_installs_identity_mapping() {
        let registry = SessionRegistry::new();
        let id = registry.open(addr(), sender());
        assert!(registry.verify(id, "alice", "000001", ""));
        assert_eq!(registry.lookup("000001"), Some(id));

        let snapshot = registry.snapshot(id).unwrap();
        assert!(snapshot.verified);
        assert_eq!(snapshot.uid, "000001");
    }

    #[test]
    fn reconnect_takes_over_mapping_last_writer_wins() {
        let registry = SessionRegistry::new();
        let old = registry.open(addr(), sender());
        registry.verify(old, "alice", "000001", "");
        let new = registry.open(addr(), sender());
        registry.verify(new, "alice", "000001", "");

        assert_eq!(registry.lookup("000001"), Some(new));
        // The old session still exists, it just lost the mapping.
        assert!(registry.snapshot(old).is_some());
    }

    #[test]
    fn stale_close_does_not_unmap_newer_session() {
        let registry = SessionRegistry::new();
        let old = registry.open(addr(), sender());
        registry.verify(old, "alice", "000001", "");
        let new = registry.open(addr(), sender());
        registry.verify(new, "alice", "000001", "");

        registry.close(old);
        assert_eq!(registry.lookup("000001"), Some(new));
        registry.close(new);
        assert_eq!(registry.lookup("000001"), None);
    }

    #[test]
    fn directory_never_maps_to_dead_session() {
        let registry = SessionRegistry::new();
        for n in 0..4 {
            let uid = if n % 2 == 0 { "000001" } else { "000002" };
            let id = registry.open(addr(), sender());
            registry.verify(id, "user", uid, "");
            registry.close(id);
            assert_eq!(registry.lookup(uid), None);
        }
    }

    #[test]
    fn logout_resets_to_guest_without_dropping_session() {
        let registry = SessionRegistry::new();
        let id = registry.open(addr(), sender());
        registry.verify(id, "alice", "000001", "ava.png");
        registry.logout(id);

        let snapshot = registry.snapshot(id).unwrap();
        assert!(!snapshot.verified);
        assert_eq!(snapshot.username, "Guest");
        assert!(snapshot.uid.is_empty());
        assert_eq!(registry.lookup("000001"), None);
    }

    #[test]
    fn roster_lists_verified_sessions_plus_the_operator() {
        let registry = SessionRegistry::new();
        let a = registry.open(addr(), sender());
        registry.verify(a, "alice", "000001", "");
        let _guest = registry.open(addr(), sender());

        let roster = registry.roster();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].uid, "000001");
        assert_eq!(roster[1].uid, MONITOR_UID);
        assert_eq!(roster[1].username, MONITOR_NAME);
    }

    #[test]
    fn operator_is_advertised_even_with_no_monitor_connected() {
        let registry = SessionRegistry::new();
        let roster = registry.roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].uid, MONITOR_UID);
    }

    #[test]
    fn direct_fanout_reaches_sender_target_and_monitors_once() {
        let registry = SessionRegistry::new();
        let alice = registry.open(addr(), sender());
        registry.verify(alice, "alice", "000001", "");
        let bob = registry.open(addr(), sender());
        registry.verify(bob, "bob", "000002", "");
        let monitor = registry.open(addr(), sender());
        registry.set_monitor(monitor);

        let targets =
            registry.fanout_targets(alice, &Target::Direct("000002".to_string()));
        assert_eq!(targets.len(), 3);

        // Offline target: echo + monitor only.
        let targets =
            registry.fanout_targets(alice, &Target::Direct("000099".to_string()));
        assert_eq!(targets.len(), 2);
    }
}
