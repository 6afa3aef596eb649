//! The durable, date-sharded conversation log.

use crate::partition::Partition;
use palaver_types::{shard_date, MessageRecord};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that can occur while appending to the history log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append-only message log, sharded by `(partition, calendar day)`.
///
/// Each shard is a file of JSON lines. Appends to the *same* shard are
/// serialized through a per-path lock so concurrent publishes never
/// interleave partial lines; appends to different shards proceed in
/// parallel. Reads take no locks at all — a torn final line is handled the
/// same way as any other corrupt line, by skipping it.
pub struct HistoryStore {
    root: PathBuf,
    shard_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl HistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shard_locks: Mutex::new(HashMap::new()),
        }
    }

    fn partition_dir(&self, partition: &Partition) -> PathBuf {
        self.root.join(partition.dir_name())
    }

    fn shard_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .shard_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Entries not held by an in-flight append only pin yesterday's
        // shards; drop them so the table stays at the working set.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn shard_lock_count(&self) -> usize {
        self.shard_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Appends one record to the shard determined by the record's
    /// timestamp, creating the partition directory and shard lazily.
    pub fn append(&self, partition: &Partition, record: &MessageRecord) -> Result<(), StoreError> {
        let dir = self.partition_dir(partition);
        let shard = dir.join(format!("{}.log", shard_date(&record.timestamp)));
        let line = serde_json::to_string(record)?;

        let lock = self.shard_lock(&shard);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&shard)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Returns the most recent `limit` records of a partition in
    /// chronological order.
    ///
    /// Shards are scanned newest-date-first; each shard's records (already
    /// in append order) are prepended to the accumulated window, and the
    /// scan stops as soon as the window is full, so the result is
    /// contiguous across day boundaries. A missing partition reads as
    /// empty, and corrupt lines or unreadable shards are skipped with a
    /// warning rather than failing the whole read.
    pub fn read_recent(&self, partition: &Partition, limit: usize) -> Vec<MessageRecord> {
        read_recent_records(&self.partition_dir(partition), "log", limit)
    }
}

/// The accumulate-front, truncate-tail shard read, shared with the
/// client-side mirror (which uses the same layout under a different root
/// and extension).
pub fn read_recent_records<T: DeserializeOwned>(dir: &Path, ext: &str, limit: usize) -> Vec<T> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut shard_names: Vec<String> = entries
        .filter_map(|entry| {
            let name = entry.ok()?.file_name().into_string().ok()?;
            name.ends_with(&format!(".{ext}")).then_some(name)
        })
        .collect();
    // Shard names are ISO dates, so lexical order is date order.
    shard_names.sort();
    shard_names.reverse();

    let mut window: Vec<T> = Vec::new();
    for name in shard_names {
        let path = dir.join(&name);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(shard = %path.display(), "skipping unreadable shard: {e}");
                continue;
            }
        };

        let mut day: Vec<T> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!(shard = %path.display(), "stopping shard read: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(record) => day.push(record),
                Err(e) => {
                    tracing::warn!(shard = %path.display(), "skipping corrupt record: {e}");
                }
            }
        }

        // Older shards are prepended so the window stays chronological.
        day.extend(window);
        window = day;
        if window.len() >= limit {
            let start = window.len() - limit;
            window.drain(..start);
            return window;
        }
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_types::{MessageKind, ReactionMap, Target};

    fn record(n: usize, timestamp: &str) -> MessageRecord {
        MessageRecord {
            id: format!("msg-{n}"),
            sender: "alice".to_string(),
            sender_uid: "000001".to_string(),
            target: Target::Global,
            content: format!("message {n}"),
            kind: MessageKind::Text,
            timestamp: timestamp.to_string(),
            temp_id: None,
            quote: None,
            reactions: ReactionMap::new(),
        }
    }

    #[test]
    fn reads_back_in_publish_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let partition = Partition::Global;

        for n in 0..5 {
            store
                .append(&partition, &record(n, "2026-08-30 10:00:00"))
                .unwrap();
        }

        let got = store.read_recent(&partition, 10);
        assert_eq!(got.len(), 5);
        for (n, msg) in got.iter().enumerate() {
            assert_eq!(msg.id, format!("msg-{n}"));
        }
    }

    #[test]
    fn read_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let partition = Partition::pair("000001", "000002");
        for n in 0..3 {
            store
                .append(&partition, &record(n, "2026-08-30 10:00:00"))
                .unwrap();
        }
        let first = store.read_recent(&partition, 10);
        let second = store.read_recent(&partition, 10);
        assert_eq!(first, second);
    }

    #[test]
    fn window_spans_day_boundary_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let partition = Partition::Global;

        // 130 messages across two calendar-day shards.
        for n in 0..60 {
            store
                .append(&partition, &record(n, "2026-08-29 23:00:00"))
                .unwrap();
        }
        for n in 60..130 {
            store
                .append(&partition, &record(n, "2026-08-30 00:10:00"))
                .unwrap();
        }

        let got = store.read_recent(&partition, 100);
        assert_eq!(got.len(), 100);
        // Most recent 100 are msg-30 .. msg-129, chronological.
        for (i, msg) in got.iter().enumerate() {
            assert_eq!(msg.id, format!("msg-{}", i + 30));
        }
    }

    #[test]
    fn limit_larger_than_history_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let partition = Partition::Global;
        for n in 0..4 {
            store
                .append(&partition, &record(n, "2026-08-30 10:00:00"))
                .unwrap();
        }
        assert_eq!(store.read_recent(&partition, 128).len(), 4);
    }

    #[test]
    fn corrupt_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let partition = Partition::Global;

        store
            .append(&partition, &record(0, "2026-08-30 10:00:00"))
            .unwrap();
        let shard = dir.path().join("global_chat").join("2026-08-30.log");
        let mut file = OpenOptions::new().append(true).open(&shard).unwrap();
        file.write_all(b"{not json at all\n").unwrap();
        drop(file);
        store
            .append(&partition, &record(1, "2026-08-30 10:00:01"))
            .unwrap();

        let got = store.read_recent(&partition, 10);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, "msg-0");
        assert_eq!(got[1].id, "msg-1");
    }

    #[test]
    fn idle_shard_locks_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());

        for day in 1..=5 {
            let partition = Partition::pair("000001", &format!("{day:06}"));
            store
                .append(&partition, &record(day, "2026-08-30 10:00:00"))
                .unwrap();
        }
        // Each append prunes the previous, now-idle entry.
        assert_eq!(store.shard_lock_count(), 1);
    }

    #[test]
    fn missing_partition_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        assert!(store
            .read_recent(&Partition::pair("000001", "000009"), 10)
            .is_empty());
    }

    #[test]
    fn message_lands_in_exactly_one_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let pair = Partition::pair("000001", "000002");
        store
            .append(&pair, &record(0, "2026-08-30 10:00:00"))
            .unwrap();

        assert_eq!(store.read_recent(&pair, 10).len(), 1);
        assert!(store.read_recent(&Partition::Global, 10).is_empty());
    }
}
