//! Conversation partitions — the addressable unit of durable storage.

use palaver_types::Target;
use std::fmt;

/// The global room's directory name under the storage root.
const GLOBAL_DIR: &str = "global_chat";

/// A conversation partition: the global room, or one unordered pair of
/// uids. Pairs are normalized by sort order at construction, so
/// `pair(a, b)` and `pair(b, a)` are the same partition and resolve to the
/// same directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Partition {
    Global,
    Pair(String, String),
}

impl Partition {
    /// Builds the normalized pair partition for two uids.
    pub fn pair(a: &str, b: &str) -> Self {
        if a <= b {
            Partition::Pair(a.to_string(), b.to_string())
        } else {
            Partition::Pair(b.to_string(), a.to_string())
        }
    }

    /// Resolves the partition a message belongs to, from its sender and
    /// target. This is the single partition rule shared by publish,
    /// reactions and history fetches.
    pub fn resolve(sender_uid: &str, target: &Target) -> Self {
        match target {
            Target::Global => Partition::Global,
            Target::Direct(uid) => Partition::pair(sender_uid, uid),
        }
    }

    /// Parses a partition back out of its directory name. Used by the
    /// monitoring surface, which addresses rooms by name; uids never
    /// contain underscores so the pair split is unambiguous.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        if name == GLOBAL_DIR {
            return Some(Partition::Global);
        }
        match name.split_once('_') {
            Some((a, b)) if !a.is_empty() && !b.is_empty() && !b.contains('_') => {
                Some(Partition::pair(a, b))
            }
            _ => None,
        }
    }

    /// The directory name for this partition under a storage root.
    pub fn dir_name(&self) -> String {
        match self {
            Partition::Global => GLOBAL_DIR.to_string(),
            Partition::Pair(lo, hi) => format!("{lo}_{hi}"),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}
