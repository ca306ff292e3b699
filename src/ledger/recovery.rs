//! Startup recovery of the local segment set
//!
//! Brings the storage root back to the ledger invariant: every segment file on
//! disk has exactly one authoritative entry and that entry says whether the
//! file can be trusted.

use super::{Ledger, LedgerEntry, LedgerError, LedgerState};
use crate::data::{is_temp_file, parse_segment_path, Segment, SegmentId, StorageLayout};
use crate::telemetry::{increment, CounterMetric};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What recovery changed
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    /// Undecodable ledger lines moved aside
    pub corrupt_lines: usize,
    /// Interrupted writes resolved to FAILED
    pub discarded: Vec<SegmentId>,
    /// Committed segments whose file was missing or damaged
    pub quarantined: Vec<SegmentId>,
    /// Files with no trustworthy entry, moved to the quarantine directory
    pub orphans: Vec<PathBuf>,
    /// Leftover temp files deleted
    pub temp_files_removed: usize,
    /// Committed segments still owed to the remote sink
    pub undispatched: Vec<Segment>,
}

impl RecoveryReport {
    /// True when nothing needed repair
    pub fn is_clean(&self) -> bool {
        self.corrupt_lines == 0
            && self.discarded.is_empty()
            && self.quarantined.is_empty()
            && self.orphans.is_empty()
            && self.temp_files_removed == 0
    }
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn move_aside(layout: &StorageLayout, file: &Path) -> io::Result<PathBuf> {
    let mut target = layout.quarantine_path(file);
    let mut n = 1;
    while target.exists() {
        target = layout
            .quarantine_path(file)
            .with_extension(format!("parquet.{}", n));
        n += 1;
    }
    fs::create_dir_all(layout.quarantine_dir())?;
    fs::rename(file, &target)?;
    Ok(target)
}

/// Resolve interrupted writes, quarantine unresolvable state, and list the
/// committed segments that still need uploading
pub fn recover_storage(
    ledger: &Ledger,
    layout: &StorageLayout,
    run_id: Uuid,
) -> Result<RecoveryReport, LedgerError> {
    let mut report = RecoveryReport::default();

    for entry in ledger.recover() {
        let temp = remove_if_exists(&layout.temp_path(&entry.segment))?;
        let partial = remove_if_exists(&layout.resolve(&entry.path))?;
        ledger.append(
            entry
                .transition(LedgerState::Failed, run_id)
                .with_error("write interrupted; discarded at recovery"),
        )?;

        increment(CounterMetric::RecoveryDiscarded, 1);
        tracing::warn!(
            segment = %entry.segment,
            removed_temp = temp,
            removed_partial = partial,
            "Discarded interrupted segment write"
        );
        report.discarded.push(entry.segment);
    }

    for entry in ledger.snapshot().into_iter().filter(|e| e.state.is_durable()) {
        if let Some(reason) = verify_file(layout, &entry)? {
            quarantine_entry(ledger, layout, &entry, &reason, run_id)?;
            report.quarantined.push(entry.segment);
            continue;
        }

        if entry.state == LedgerState::Committed {
            match entry.to_segment(layout) {
                Some(segment) => report.undispatched.push(segment),
                None => {
                    quarantine_entry(ledger, layout, &entry, "committed entry lacks file stats", run_id)?;
                    report.quarantined.push(entry.segment);
                }
            }
        }
    }

    for file in layout.list_segment_files()? {
        if is_temp_file(&file) {
            if remove_if_exists(&file)? {
                report.temp_files_removed += 1;
            }
            continue;
        }

        let trusted = parse_segment_path(&file)
            .and_then(|id| ledger.latest(&id))
            .is_some_and(|entry| entry.state.is_durable());
        if !trusted {
            let target = move_aside(layout, &file)?;
            increment(CounterMetric::Quarantined, 1);
            tracing::error!(
                file = ?file,
                moved_to = ?target,
                "Segment file has no trustworthy ledger entry; quarantined"
            );
            report.orphans.push(target);
        }
    }

    tracing::info!(
        discarded = report.discarded.len(),
        quarantined = report.quarantined.len(),
        orphans = report.orphans.len(),
        temp_files_removed = report.temp_files_removed,
        undispatched = report.undispatched.len(),
        "Storage recovery complete"
    );

    Ok(report)
}

/// Reason the file of a durable entry can't be trusted, if any
fn verify_file(layout: &StorageLayout, entry: &LedgerEntry) -> io::Result<Option<String>> {
    match fs::metadata(layout.resolve(&entry.path)) {
        Ok(meta) if Some(meta.len()) == entry.byte_size => Ok(None),
        Ok(meta) => Ok(Some(format!(
            "size mismatch: ledger {:?}, disk {}",
            entry.byte_size,
            meta.len()
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Some("segment file missing".into())),
        Err(e) => Err(e),
    }
}

fn quarantine_entry(
    ledger: &Ledger,
    layout: &StorageLayout,
    entry: &LedgerEntry,
    reason: &str,
    run_id: Uuid,
) -> Result<(), LedgerError> {
    let path = layout.resolve(&entry.path);
    let moved = if path.exists() {
        Some(move_aside(layout, &path)?)
    } else {
        None
    };

    let error = match &moved {
        Some(target) => format!("{}; moved to {}", reason, target.display()),
        None => reason.to_string(),
    };
    ledger.append(entry.transition(LedgerState::Quarantined, run_id).with_error(error))?;

    increment(CounterMetric::Quarantined, 1);
    tracing::error!(
        segment = %entry.segment,
        reason,
        moved_to = ?moved,
        "Committed segment failed verification; quarantined"
    );
    Ok(())
}
