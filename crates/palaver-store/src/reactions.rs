//! The append-only reaction ledger and its in-memory aggregate.

use crate::partition::Partition;
use palaver_types::{MessageRecord, ReactionEvent, ReactionMap};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Errors that can occur while appending to the reaction ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

const LEDGER_FILE: &str = "reactions.log";

/// Append-only reaction event log plus the aggregate folded from it.
///
/// Events are never deleted; the aggregate `message_id -> {kind -> count}`
/// is a pure fold over them and is rebuilt by [`ReactionLedger::open`] on
/// startup, so it survives process restarts with no other state. Append
/// and fold run under the same lock so the file and the aggregate cannot
/// diverge.
pub struct ReactionLedger {
    root: PathBuf,
    inner: Mutex<HashMap<String, ReactionMap>>,
}

impl ReactionLedger {
    /// Opens the ledger, replaying every partition's event log into the
    /// aggregate. A missing root reads as empty; corrupt lines are skipped.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        let mut aggregate: HashMap<String, ReactionMap> = HashMap::new();

        if let Ok(entries) = fs::read_dir(&root) {
            for entry in entries.flatten() {
                let ledger = entry.path().join(LEDGER_FILE);
                let file = match fs::File::open(&ledger) {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                for line in BufReader::new(file).lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ReactionEvent>(&line) {
                        Ok(event) => fold(&mut aggregate, &event),
                        Err(e) => {
                            tracing::warn!(ledger = %ledger.display(), "skipping corrupt reaction event: {e}");
                        }
                    }
                }
            }
        }

        Ok(Self {
            root,
            inner: Mutex::new(aggregate),
        })
    }

    /// Appends one event to the owning partition's ledger and folds it into
    /// the aggregate, returning the message's updated reaction map.
    pub fn react(
        &self,
        partition: &Partition,
        event: &ReactionEvent,
    ) -> Result<ReactionMap, LedgerError> {
        let dir = self.root.join(partition.dir_name());
        let line = serde_json::to_string(event)?;

        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LEDGER_FILE))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        fold(&mut inner, event);
        Ok(inner
            .get(&event.message_id)
            .cloned()
            .unwrap_or_default())
    }

    /// The current aggregate for one message id.
    pub fn snapshot(&self, message_id: &str) -> ReactionMap {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(message_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Stamps the live aggregate onto records at read time.
    pub fn overlay(&self, records: &mut [MessageRecord]) {
        let inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for record in records {
            if let Some(reactions) = inner.get(&record.id) {
                record.reactions = reactions.clone();
            }
        }
    }
}

fn fold(aggregate: &mut HashMap<String, ReactionMap>, event: &ReactionEvent) {
    *aggregate
        .entry(event.message_id.clone())
        .or_default()
        .entry(event.reaction_kind.clone())
        .or_insert(0) += 1;
}
