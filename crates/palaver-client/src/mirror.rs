//! The deduplicated local replica of conversations this client has seen.
//!
//! Layout mirrors the server's store under a per-identity root:
//! `<data_dir>/<my_uid>/chat_logs/<partner>/YYYY-MM-DD.json`, JSON lines.
//! A message is always filed under the *other* party's uid (or the global
//! sentinel), never under the local identity, so both directions of a
//! conversation land in the same directory.

use palaver_store::read_recent_records;
use palaver_types::{shard_date, MessageRecord, Target, GLOBAL_TARGET};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

use crate::state::Profile;

const PROFILE_FILE: &str = "profile.json";
const SHARD_EXT: &str = "json";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no local identity set")]
    NoIdentity,
}

/// File-backed conversation mirror plus the cached verified profile.
pub struct LocalMirror {
    root: PathBuf,
    my_uid: Mutex<Option<String>>,
}

impl LocalMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            my_uid: Mutex::new(None),
        }
    }

    fn lock_uid(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.my_uid
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Binds the mirror to a verified identity; records before this point
    /// cannot be filed.
    pub fn set_identity(&self, uid: &str) {
        *self.lock_uid() = Some(uid.to_string());
    }

    pub fn clear_identity(&self) {
        *self.lock_uid() = None;
    }

    fn chat_dir(&self, my_uid: &str) -> PathBuf {
        self.root.join(my_uid).join("chat_logs")
    }

    /// The directory a record files under: the global sentinel, or the
    /// conversation partner's uid.
    fn partner_of(my_uid: &str, record: &MessageRecord) -> String {
        match &record.target {
            Target::Global => GLOBAL_TARGET.to_string(),
            Target::Direct(uid) if record.sender_uid == my_uid => uid.clone(),
            Target::Direct(_) => record.sender_uid.clone(),
        }
    }

    /// Files one record, skipping it if its id is already present in the
    /// target shard. Shards are bounded to one day of traffic, so the
    /// scan-per-write stays cheap.
    pub fn record(&self, record: &MessageRecord) -> Result<(), MirrorError> {
        let my_uid = self.lock_uid().clone().ok_or(MirrorError::NoIdentity)?;
        let dir = self
            .chat_dir(&my_uid)
            .join(Self::partner_of(&my_uid, record));
        let shard = dir.join(format!("{}.{SHARD_EXT}", shard_date(&record.timestamp)));

        let seen = match fs::File::open(&shard) {
            Ok(file) => BufReader::new(file)
                .lines()
                .map_while(Result::ok)
                .filter_map(|line| {
                    serde_json::from_str::<MessageRecord>(&line)
                        .ok()
                        .map(|r| r.id)
                })
                .collect::<HashSet<String>>(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        if seen.contains(&record.id) {
            return Ok(());
        }

        let line = serde_json::to_string(record)?;
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&shard)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Files a whole history batch, deduplicating each record. Per-record
    /// failures are logged and do not stop the batch.
    pub fn record_batch(&self, records: &[MessageRecord]) {
        for record in records {
            if let Err(err) = self.record(record) {
                tracing::warn!(id = %record.id, error = %err, "failed to mirror record");
            }
        }
    }

    /// The most recent `limit` mirrored records for a partner (or the
    /// global sentinel), chronological.
    pub fn read_recent(&self, partner: &str, limit: usize) -> Vec<MessageRecord> {
        let Some(my_uid) = self.lock_uid().clone() else {
            return Vec::new();
        };
        read_recent_records(&self.chat_dir(&my_uid).join(partner), SHARD_EXT, limit)
    }

    /// Persists the verified profile for the next run's token reauth.
    pub fn save_profile(&self, profile: &Profile) -> Result<(), MirrorError> {
        fs::create_dir_all(&self.root)?;
        let json = serde_json::to_string_pretty(profile)?;
        fs::write(self.root.join(PROFILE_FILE), json)?;
        Ok(())
    }

    /// The profile saved by a previous run, if any.
    pub fn load_profile(&self) -> Option<Profile> {
        let contents = fs::read_to_string(self.root.join(PROFILE_FILE)).ok()?;
        match serde_json::from_str(&contents) {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable cached profile");
                None
            }
        }
    }

    pub fn delete_profile(&self) {
        let _ = fs::remove_file(self.root.join(PROFILE_FILE));
    }
}
