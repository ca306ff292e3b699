//! Batch flusher
//!
//! Drains the ingest buffer into partitioned batches and commits each one as
//! an immutable segment under the write-ahead ledger.

mod flusher;
mod partition;

pub use flusher::{commit_segment, BatchFlusher, FlushError, FlusherStats};
pub use partition::split_by_partition;
