//! Shared wire and domain types for the Palaver chat relay.
//!
//! Both the server and the client daemon speak the same WebSocket protocol:
//! JSON envelopes of the form `{"event": <name>, "data": {...}}`. The event
//! enums here are the single authoritative definition of that protocol, and
//! the [`MessageRecord`] struct doubles as the on-disk shard line format.
//!
//! No crate in the workspace depends on anything *except* `palaver-types`
//! for cross-cutting type definitions, which keeps the dependency graph
//! acyclic.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Aggregated reactions for one message: reaction kind -> count.
pub type ReactionMap = HashMap<String, u64>;

/// The sentinel target value naming the shared global room.
pub const GLOBAL_TARGET: &str = "global";

/// Display name the monitoring operator appears under.
pub const MONITOR_NAME: &str = "Admin";

/// Reserved uid the monitoring operator sends and receives as. Users can
/// address it like any other uid; it never appears in the user store.
pub const MONITOR_UID: &str = "ADMIN";

/// Where a message is addressed: the shared global room, or one user.
///
/// On the wire this is a plain string — the literal `"global"` (or an empty
/// string, which some older clients send for broadcasts) means the global
/// room; anything else is treated as a uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Target {
    #[default]
    Global,
    Direct(String),
}

impl Target {
    /// Parses the wire form of a target string.
    pub fn from_wire(s: &str) -> Self {
        if s.is_empty() || s == GLOBAL_TARGET {
            Target::Global
        } else {
            Target::Direct(s.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Global => GLOBAL_TARGET,
            Target::Direct(uid) => uid,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Target::Global)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TargetVisitor;

        impl Visitor<'_> for TargetVisitor {
            type Value = Target;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("\"global\" or a uid string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Target, E> {
                Ok(Target::from_wire(v))
            }

            // Older clients send null for global broadcasts.
            fn visit_unit<E: de::Error>(self) -> Result<Target, E> {
                Ok(Target::Global)
            }

            fn visit_none<E: de::Error>(self) -> Result<Target, E> {
                Ok(Target::Global)
            }
        }

        deserializer.deserialize_any(TargetVisitor)
    }
}

/// Payload category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
}

/// One relayed chat message.
///
/// Created exactly once, at relay time, with a server-assigned `id`;
/// immutable afterwards except for the `reactions` snapshot, which is
/// overlaid from the reaction ledger on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server-assigned unique id (uuid hex). Never taken from the sender.
    pub id: String,
    /// Username of the sender at send time.
    pub sender: String,
    pub sender_uid: String,
    #[serde(default)]
    pub target: Target,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Wall-clock timestamp, `%Y-%m-%d %H:%M:%S`.
    pub timestamp: String,
    /// Client-side correlation id, echoed back so the sender's UI can
    /// reconcile its optimistic rendering. Not meaningful to anyone else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    /// Id of a prior message this one quotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    /// Reaction snapshot at serialization time. Possibly stale; the
    /// authoritative aggregate lives in the reaction ledger.
    #[serde(default)]
    pub reactions: ReactionMap,
}

/// One appended reaction, the unit of the append-only reaction ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub message_id: String,
    pub reaction_kind: String,
    pub timestamp: String,
}

/// A verified user as shown in the "who is online" roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    pub uid: String,
    #[serde(default)]
    pub avatar: String,
}

/// One row in the monitor's directory view: every registered account with
/// its live connection status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorUserEntry {
    pub uid: String,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
    /// `"online"` or `"offline"`.
    pub status: String,
}

fn default_history_limit() -> usize {
    128
}

fn default_monitor_history_limit() -> usize {
    256
}

/// Events sent by a client over the persistent connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "request_verification_code")]
    RequestVerificationCode,
    #[serde(rename = "submit_login_verify")]
    SubmitLoginVerify {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        uid: Option<String>,
        #[serde(default)]
        token: Option<String>,
    },
    #[serde(rename = "client_logout")]
    Logout,
    #[serde(rename = "client_message")]
    Message {
        content: String,
        #[serde(rename = "type", default)]
        kind: MessageKind,
        #[serde(default)]
        temp_id: Option<String>,
        #[serde(default)]
        target: Target,
        #[serde(default)]
        quote: Option<String>,
    },
    #[serde(rename = "client_reaction")]
    Reaction {
        msg_id: String,
        reaction_kind: String,
        #[serde(default)]
        target: Target,
    },
    #[serde(rename = "request_chat_history")]
    ChatHistory {
        #[serde(default)]
        target: Target,
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
    #[serde(rename = "update_profile")]
    UpdateProfile {
        #[serde(default)]
        new_avatar: Option<String>,
        #[serde(default)]
        new_username: Option<String>,
        #[serde(default)]
        new_password: Option<String>,
    },
    #[serde(rename = "client_check_user")]
    CheckUser { username: String },
    #[serde(rename = "monitor_join")]
    MonitorJoin,
    #[serde(rename = "monitor_message")]
    MonitorMessage {
        target: Target,
        content: String,
        #[serde(rename = "type", default)]
        kind: MessageKind,
    },
    #[serde(rename = "monitor_history")]
    MonitorHistory {
        /// Partition directory name: `global_chat` or a `{lo}_{hi}` pair.
        room: String,
        #[serde(default = "default_monitor_history_limit")]
        limit: usize,
    },
}

/// Events sent by the server over the persistent connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "verification_success")]
    VerificationSuccess {
        username: String,
        uid: String,
        #[serde(default)]
        avatar: String,
        /// Present on login and token reauth; absent on profile updates.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    #[serde(rename = "verification_failed")]
    VerificationFailed { msg: String },
    #[serde(rename = "system_send_code")]
    SystemSendCode { code: String },
    #[serde(rename = "show_notification")]
    ShowNotification { msg: String },
    #[serde(rename = "receive_message")]
    ReceiveMessage(MessageRecord),
    #[serde(rename = "reaction_update")]
    ReactionUpdate {
        msg_id: String,
        reactions: ReactionMap,
    },
    #[serde(rename = "history_loaded")]
    HistoryLoaded {
        messages: Vec<MessageRecord>,
        target: Target,
    },
    #[serde(rename = "update_user_list")]
    UpdateUserList(Vec<UserSummary>),
    #[serde(rename = "monitor_history_loaded")]
    MonitorHistoryLoaded {
        room: String,
        messages: Vec<MessageRecord>,
    },
    #[serde(rename = "monitor_user_list")]
    MonitorUserList(Vec<MonitorUserEntry>),
    #[serde(rename = "client_check_user_result")]
    CheckUserResult {
        exists: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        avatar: Option<String>,
    },
}

/// Mints a new server-side unique id (message ids, bearer tokens).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Current wall-clock timestamp in the record format.
pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Current calendar day in the shard-file format.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Extracts the calendar day from a record timestamp.
///
/// Record timestamps always start with `YYYY-MM-DD`; anything that does not
/// (too short, wrong shape, or a non-ASCII prefix) falls back to today so a
/// malformed timestamp still lands in a valid shard.
pub fn shard_date(timestamp: &str) -> String {
    match timestamp.get(..10) {
        Some(day) if day.as_bytes()[4] == b'-' => day.to_string(),
        _ => today(),
    }
}
