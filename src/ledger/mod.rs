//! Write-ahead ledger
//!
//! Append-only record of segment flush intent and outcome. State transitions
//! are new lines for the same segment; the latest line is authoritative.

mod recovery;
mod store;
mod types;

pub use recovery::{recover_storage, RecoveryReport};
pub use store::{EntryLog, Ledger, LedgerLoad};
pub use types::{LedgerEntry, LedgerError, LedgerState};
