//! Append-only JSON-lines ledger

use super::{LedgerEntry, LedgerError, LedgerState};
use crate::data::SegmentId;
use crate::telemetry::{increment, CounterMetric};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What `Ledger::open` found on disk
#[derive(Debug, Default, Clone)]
pub struct LedgerLoad {
    /// Valid lines read
    pub entries: usize,
    /// Distinct segments referenced
    pub segments: usize,
    /// Lines that could not be decoded
    pub corrupt_lines: usize,
    /// Copy of the original file kept when corrupt lines were found
    pub quarantined_to: Option<PathBuf>,
}

struct LedgerInner {
    file: File,
    /// File length after the last fully synced line
    synced_len: u64,
    latest: BTreeMap<SegmentId, LedgerEntry>,
}

/// Append target for segment state transitions
pub trait EntryLog: Send + Sync {
    /// Durably record `entry`
    fn append(&self, entry: LedgerEntry) -> Result<(), LedgerError>;
}

/// Durable, ordered record of flush intents and outcomes
pub struct Ledger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("path", &self.path).finish()
    }
}

fn parse_lines(content: &str) -> (Vec<LedgerEntry>, usize) {
    let mut entries = Vec::new();
    let mut corrupt = 0;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<LedgerEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => corrupt += 1,
        }
    }
    (entries, corrupt)
}

fn write_synced(path: &Path, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
    let mut file = File::create(path)?;
    for entry in entries {
        serde_json::to_writer(&mut file, entry)?;
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok(())
}

impl Ledger {
    /// Open (or create) the ledger at `path`.
    ///
    /// Undecodable lines are moved aside with a copy of the original file and
    /// the ledger is rewritten from the remaining valid entries.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, LedgerLoad), LedgerError> {
        let path = path.into();
        let mut load = LedgerLoad::default();
        let mut entries = Vec::new();

        if path.exists() {
            let raw = fs::read(&path)?;
            let content = String::from_utf8_lossy(&raw);
            let (parsed, corrupt) = parse_lines(&content);
            entries = parsed;
            load.corrupt_lines = corrupt;

            if corrupt > 0 {
                let aside = path.with_extension(format!(
                    "jsonl.corrupt-{}",
                    Utc::now().format("%Y%m%dT%H%M%S%3fZ")
                ));
                fs::copy(&path, &aside)?;

                let rewrite = path.with_extension("jsonl.rewrite");
                write_synced(&rewrite, &entries)?;
                fs::rename(&rewrite, &path)?;

                increment(CounterMetric::Quarantined, corrupt as u64);
                tracing::error!(
                    corrupt_lines = corrupt,
                    quarantined = ?aside,
                    "Ledger contained unreadable entries; moved aside, continuing degraded"
                );
                load.quarantined_to = Some(aside);
            } else if !raw.is_empty() && !raw.ends_with(b"\n") {
                // Complete final line without its newline
                OpenOptions::new().append(true).open(&path)?.write_all(b"\n")?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let synced_len = file.metadata()?.len();
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        load.entries = entries.len();
        let mut latest = BTreeMap::new();
        for entry in entries {
            latest.insert(entry.segment, entry);
        }
        load.segments = latest.len();

        tracing::debug!(
            path = ?path,
            entries = load.entries,
            segments = load.segments,
            "Opened ledger"
        );

        Ok((
            Self {
                path,
                inner: Mutex::new(LedgerInner {
                    file,
                    synced_len,
                    latest,
                }),
            },
            load,
        ))
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append an entry; returns once the line is synced
    pub fn append(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut inner = self.lock();
        let start = inner.synced_len;
        if inner.file.metadata()?.len() != start {
            // Drop bytes of an earlier failed write so this entry starts a line
            inner.file.set_len(start)?;
        }

        let file = &mut inner.file;
        let written = file.write_all(&line).and_then(|()| file.sync_data());
        if let Err(e) = written {
            if let Err(truncate) = inner.file.set_len(start) {
                tracing::error!(error = %truncate, "Could not trim partial ledger line");
            }
            return Err(e.into());
        }

        inner.synced_len = start + line.len() as u64;
        inner.latest.insert(entry.segment, entry);
        Ok(())
    }

    /// Authoritative entry for a segment
    pub fn latest(&self, segment: &SegmentId) -> Option<LedgerEntry> {
        self.lock().latest.get(segment).cloned()
    }

    /// Latest entry of every segment, ordered by segment id
    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.lock().latest.values().cloned().collect()
    }

    fn in_state(&self, state: LedgerState) -> Vec<LedgerEntry> {
        self.lock()
            .latest
            .values()
            .filter(|e| e.state == state)
            .cloned()
            .collect()
    }

    /// Entries whose write never reached COMMITTED or FAILED
    pub fn recover(&self) -> Vec<LedgerEntry> {
        self.in_state(LedgerState::Pending)
    }

    /// Committed segments not yet mirrored remotely
    pub fn undispatched(&self) -> Vec<LedgerEntry> {
        self.in_state(LedgerState::Committed)
    }

    /// Next unused sequence number for a partition
    pub fn next_sequence(&self, partition: NaiveDate) -> u64 {
        let inner = self.lock();
        inner
            .latest
            .range(SegmentId::new(partition, 0)..=SegmentId::new(partition, u64::MAX))
            .next_back()
            .map(|(id, _)| id.sequence + 1)
            .unwrap_or(1)
    }

    /// Read every decodable line without opening for writes
    pub fn read_history(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>, LedgerError> {
        let raw = fs::read(path)?;
        let (entries, _) = parse_lines(&String::from_utf8_lossy(&raw));
        Ok(entries)
    }
}

impl EntryLog for Ledger {
    fn append(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        Ledger::append(self, entry)
    }
}
