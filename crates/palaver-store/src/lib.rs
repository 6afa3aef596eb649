//! Durable storage for the Palaver chat relay.
//!
//! Three file-backed stores live here, all line-delimited JSON under a
//! single storage root:
//!
//! - [`HistoryStore`] — the append-only, date-sharded conversation log
//!   (`<root>/<partition>/<YYYY-MM-DD>.log`).
//! - [`ReactionLedger`] — an append-only reaction event log per partition
//!   (`<root>/<partition>/reactions.log`) plus the in-memory aggregate
//!   rebuilt from it at startup.
//! - [`UserStore`] — the credential/profile file (`users.json`), a simple
//!   whole-file rewrite store with no coordination concerns.

mod history;
mod partition;
mod reactions;
mod users;

pub use history::{read_recent_records, HistoryStore, StoreError};
pub use partition::Partition;
pub use reactions::{LedgerError, ReactionLedger};
pub use users::{LoginOutcome, UserRecord, UserStore, UserStoreError};
