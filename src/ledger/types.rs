//! Ledger entry types

use crate::data::{Segment, SegmentId, StorageLayout, WrittenFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// State of a segment as recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerState {
    /// Write intent recorded; file not yet trustworthy
    Pending,
    /// File durable at its final path
    Committed,
    /// Write failed or was interrupted; no file kept
    Failed,
    /// Committed and mirrored to the remote sink
    Uploaded,
    /// Unresolvable at recovery; file (if any) moved aside
    Quarantined,
}

impl LedgerState {
    /// Whether the final file is safe to read
    pub fn is_durable(self) -> bool {
        matches!(self, LedgerState::Committed | LedgerState::Uploaded)
    }
}

/// One appended ledger line; the latest line per segment is authoritative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub segment: SegmentId,
    pub state: LedgerState,
    pub recorded_at: DateTime<Utc>,
    /// Segment path relative to the storage root
    pub path: PathBuf,
    /// Process run that appended this line
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LedgerEntry {
    pub fn new(segment: SegmentId, state: LedgerState, path: PathBuf, run_id: Uuid) -> Self {
        Self {
            segment,
            state,
            recorded_at: Utc::now(),
            path,
            run_id,
            row_count: None,
            byte_size: None,
            checksum: None,
            remote_uri: None,
            error: None,
        }
    }

    /// Same segment, new state, fresh timestamp
    pub fn transition(&self, state: LedgerState, run_id: Uuid) -> Self {
        Self {
            state,
            recorded_at: Utc::now(),
            run_id,
            error: None,
            ..self.clone()
        }
    }

    pub fn with_file(mut self, file: &WrittenFile) -> Self {
        self.row_count = Some(file.row_count);
        self.byte_size = Some(file.byte_size);
        self.checksum = Some(file.checksum.clone());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_remote_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_uri = Some(uri.into());
        self
    }

    /// Committed segment described by this entry, if its file stats are known
    pub fn to_segment(&self, layout: &StorageLayout) -> Option<Segment> {
        Some(Segment {
            id: self.segment,
            path: layout.resolve(&self.path),
            row_count: self.row_count?,
            byte_size: self.byte_size?,
            checksum: self.checksum.clone()?,
        })
    }
}

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Ledger encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
