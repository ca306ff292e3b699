//! Upload task types

use crate::data::Segment;
use thiserror::Error;

/// Remote sink failure classes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Retried with backoff
    #[error("Transient remote error: {0}")]
    Transient(String),
    /// Not retried; surfaced as an alert
    #[error("Permanent remote error: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Lifecycle of one segment upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Queued,
    InFlight,
    /// Waiting out a backoff delay
    RetryScheduled,
    Done,
    /// Permanent failure; left for the next process start
    Rejected,
}

/// Upload of one committed segment
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub segment: Segment,
    pub remote_key: String,
    pub attempts: u32,
    pub last_error: Option<SinkError>,
    pub state: UploadState,
    pub remote_uri: Option<String>,
}

impl UploadTask {
    pub fn new(segment: Segment, remote_key: String) -> Self {
        Self {
            segment,
            remote_key,
            attempts: 0,
            last_error: None,
            state: UploadState::Queued,
            remote_uri: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, UploadState::Done | UploadState::Rejected)
    }
}
