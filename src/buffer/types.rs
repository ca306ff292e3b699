//! Buffer admission outcomes and errors

use crate::config::OverflowPolicy;
use thiserror::Error;

/// Outcome of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Record buffered
    Accepted,
    /// Record at or below its source watermark; discarded
    Duplicate,
}

/// Buffer errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BufferError {
    /// Buffer stayed full past the enqueue timeout.
    ///
    /// With `DropOldest` the incoming record was admitted and `evicted`
    /// older records were discarded; with `DropNewest` the incoming record
    /// was discarded.
    #[error("Buffer overflow ({policy:?}, evicted {evicted})")]
    Overflow {
        policy: OverflowPolicy,
        evicted: usize,
    },
    /// Buffer closed for shutdown
    #[error("Buffer closed")]
    Closed,
}
