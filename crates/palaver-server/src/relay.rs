//! Message relay: publish, reactions, history, lookups and roster fan-out.
//!
//! The relay is the authoritative path for chat traffic. Every published
//! record gets a server-minted id and timestamp, is appended to durable
//! history before fan-out, and is delivered to the partition's audience via
//! each session's bounded outbound queue.

use crate::registry::{SessionId, SessionRegistry};
use palaver_store::{HistoryStore, Partition, ReactionLedger, UserStore};
use palaver_types::{
    new_id, now_timestamp, MessageKind, MessageRecord, MonitorUserEntry, ReactionEvent,
    ReactionMap, ServerEvent, Target, MONITOR_NAME, MONITOR_UID,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Incoming message fields as supplied by the client.
pub struct Publish {
    pub content: String,
    pub kind: MessageKind,
    pub temp_id: Option<String>,
    pub target: Target,
    pub quote: Option<String>,
}

pub struct Relay {
    pub registry: SessionRegistry,
    history: HistoryStore,
    reactions: ReactionLedger,
    users: Arc<UserStore>,
}

impl Relay {
    pub fn new(
        registry: SessionRegistry,
        history: HistoryStore,
        reactions: ReactionLedger,
        users: Arc<UserStore>,
    ) -> Self {
        Self {
            registry,
            history,
            reactions,
            users,
        }
    }

    fn deliver(senders: &[mpsc::Sender<String>], event: &ServerEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "failed to serialize outbound event");
                return;
            }
        };
        for sender in senders {
            if sender.try_send(frame.clone()).is_err() {
                warn!("dropping event for slow or closed session");
            }
        }
    }

    fn deliver_one(sender: &mpsc::Sender<String>, event: &ServerEvent) {
        Self::deliver(std::slice::from_ref(sender), event);
    }

    /// Sends an event to one session's queue, if the session still exists.
    pub fn send_to(&self, session: SessionId, event: &ServerEvent) {
        if let Some(snapshot) = self.registry.snapshot(session) {
            Self::deliver_one(&snapshot.sender, event);
        }
    }

    /// Publishes a message from a verified session: persist, then fan out.
    /// Unverified senders are dropped without a reply.
    pub fn publish(&self, session: SessionId, publish: Publish) {
        let Some(snapshot) = self.registry.snapshot(session) else {
            return;
        };
        if !snapshot.verified {
            debug!(session = %session, "ignoring message from unverified session");
            return;
        }

        let record = MessageRecord {
            id: new_id(),
            sender: snapshot.username.clone(),
            sender_uid: snapshot.uid.clone(),
            target: publish.target.clone(),
            content: publish.content,
            kind: publish.kind,
            timestamp: now_timestamp(),
            temp_id: publish.temp_id,
            quote: publish.quote,
            reactions: ReactionMap::new(),
        };

        let partition = Partition::resolve(&snapshot.uid, &record.target);
        if let Err(err) = self.history.append(&partition, &record) {
            // Delivery still proceeds; the record is just not replayable.
            error!(partition = %partition, error = %err, "failed to persist message");
        }

        let audience = self.registry.fanout_targets(session, &record.target);
        Self::deliver(&audience, &ServerEvent::ReceiveMessage(record));
    }

    /// Records a reaction and fans the updated aggregate out to the same
    /// audience as the message's partition. Unverified senders are dropped.
    pub fn react(&self, session: SessionId, msg_id: String, reaction_kind: String, target: Target) {
        let Some(snapshot) = self.registry.snapshot(session) else {
            return;
        };
        if !snapshot.verified {
            debug!(session = %session, "ignoring reaction from unverified session");
            return;
        }

        let partition = Partition::resolve(&snapshot.uid, &target);
        let event = ReactionEvent {
            message_id: msg_id.clone(),
            reaction_kind,
            timestamp: now_timestamp(),
        };
        let reactions = match self.reactions.react(&partition, &event) {
            Ok(reactions) => reactions,
            Err(err) => {
                error!(partition = %partition, error = %err, "failed to persist reaction");
                return;
            }
        };

        let audience = self.registry.fanout_targets(session, &target);
        Self::deliver(&audience, &ServerEvent::ReactionUpdate { msg_id, reactions });
    }

    /// Replies to one session with recent history for a partition, with the
    /// reaction aggregate overlaid. Unverified sessions get nothing.
    pub fn fetch_history(&self, session: SessionId, target: Target, limit: usize) {
        let Some(snapshot) = self.registry.snapshot(session) else {
            return;
        };
        if !snapshot.verified {
            debug!(session = %session, "ignoring history request from unverified session");
            return;
        }

        let partition = Partition::resolve(&snapshot.uid, &target);
        let mut messages = self.history.read_recent(&partition, limit);
        self.reactions.overlay(&mut messages);
        Self::deliver_one(&snapshot.sender, &ServerEvent::HistoryLoaded { messages, target });
    }

    /// Recent global history for the monitoring audience, reactions overlaid.
    pub fn monitor_history(&self, limit: usize) -> Vec<MessageRecord> {
        let mut messages = self.history.read_recent(&Partition::Global, limit);
        self.reactions.overlay(&mut messages);
        messages
    }

    /// Publishes a message from a monitoring session under the operator
    /// identity. Only direct targets are accepted; the record lands in the
    /// operator/target pair partition and reaches the target (if online)
    /// plus every monitor.
    pub fn monitor_publish(
        &self,
        session: SessionId,
        target: Target,
        content: String,
        kind: MessageKind,
    ) {
        let Some(snapshot) = self.registry.snapshot(session) else {
            return;
        };
        if !snapshot.monitor {
            debug!(session = %session, "ignoring operator message from non-monitor session");
            return;
        }
        if target.is_global() {
            debug!(session = %session, "operator messages require a direct target");
            return;
        }

        let record = MessageRecord {
            id: new_id(),
            sender: MONITOR_NAME.to_string(),
            sender_uid: MONITOR_UID.to_string(),
            target: target.clone(),
            content,
            kind,
            timestamp: now_timestamp(),
            temp_id: None,
            quote: None,
            reactions: ReactionMap::new(),
        };

        let partition = Partition::resolve(MONITOR_UID, &target);
        if let Err(err) = self.history.append(&partition, &record) {
            error!(partition = %partition, error = %err, "failed to persist operator message");
        }

        let audience = self.registry.fanout_targets(session, &target);
        Self::deliver(&audience, &ServerEvent::ReceiveMessage(record));
    }

    /// Replies to a monitoring session with recent history for any room,
    /// addressed by partition directory name, reactions overlaid.
    pub fn monitor_fetch_history(&self, session: SessionId, room: &str, limit: usize) {
        let Some(snapshot) = self.registry.snapshot(session) else {
            return;
        };
        if !snapshot.monitor {
            debug!(session = %session, "ignoring room history request from non-monitor session");
            return;
        }
        let Some(partition) = Partition::from_dir_name(room) else {
            debug!(session = %session, room = %room, "unparseable room name");
            return;
        };

        let mut messages = self.history.read_recent(&partition, limit);
        self.reactions.overlay(&mut messages);
        Self::deliver_one(
            &snapshot.sender,
            &ServerEvent::MonitorHistoryLoaded {
                room: room.to_string(),
                messages,
            },
        );
    }

    /// Directory lookup by username or uid; replies to the requester only.
    pub fn check_user(&self, session: SessionId, query: &str) {
        let Some(snapshot) = self.registry.snapshot(session) else {
            return;
        };
        let event = match self.users.find_by_name_or_uid(query) {
            Some(user) => ServerEvent::CheckUserResult {
                exists: true,
                uid: Some(user.uid),
                username: Some(user.username),
                avatar: Some(user.avatar),
            },
            None => ServerEvent::CheckUserResult {
                exists: false,
                uid: None,
                username: None,
                avatar: None,
            },
        };
        Self::deliver_one(&snapshot.sender, &event);
    }

    /// Applies profile changes for a verified session, re-emits the session's
    /// identity (without a token) and refreshes everyone's roster.
    pub fn update_profile(
        &self,
        session: SessionId,
        new_username: Option<String>,
        new_password: Option<String>,
        new_avatar: Option<String>,
    ) {
        let Some(snapshot) = self.registry.snapshot(session) else {
            return;
        };
        if !snapshot.verified {
            return;
        }

        match self.users.update_profile(
            &snapshot.uid,
            new_username.as_deref(),
            new_password.as_deref(),
            new_avatar.as_deref(),
        ) {
            Ok(user) => {
                self.registry.update_profile(session, &user.username, &user.avatar);
                Self::deliver_one(
                    &snapshot.sender,
                    &ServerEvent::VerificationSuccess {
                        username: user.username,
                        uid: user.uid,
                        avatar: user.avatar,
                        token: None,
                    },
                );
                self.broadcast_roster();
            }
            Err(err) => {
                Self::deliver_one(
                    &snapshot.sender,
                    &ServerEvent::ShowNotification {
                        msg: err.to_string(),
                    },
                );
            }
        }
    }

    /// Pushes the current roster to every connected session.
    pub fn broadcast_roster(&self) {
        let roster = self.registry.roster();
        let audience = self.registry.all_senders();
        Self::deliver(&audience, &ServerEvent::UpdateUserList(roster));
    }

    /// Pushes the current roster to the monitoring audience only.
    pub fn broadcast_roster_to_monitors(&self) {
        let senders = self.registry.monitor_senders();
        if senders.is_empty() {
            return;
        }
        Self::deliver(&senders, &ServerEvent::UpdateUserList(self.registry.roster()));
    }

    /// Pushes the full registered-user directory, with live connection
    /// status, to the monitoring audience.
    pub fn broadcast_monitor_directory(&self) {
        let senders = self.registry.monitor_senders();
        if senders.is_empty() {
            return;
        }
        let online = self.registry.online_uids();
        let entries: Vec<MonitorUserEntry> = self
            .users
            .all()
            .into_iter()
            .map(|user| MonitorUserEntry {
                status: if online.contains(&user.uid) {
                    "online".to_string()
                } else {
                    "offline".to_string()
                },
                uid: user.uid,
                username: user.username,
                avatar: user.avatar,
            })
            .collect();
        Self::deliver(&senders, &ServerEvent::MonitorUserList(entries));
    }
}
