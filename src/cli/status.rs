//! Status command implementation

use crate::config::Config;
use crate::data::{SegmentId, StorageLayout};
use crate::ledger::{Ledger, LedgerEntry, LedgerState};
use clap::Args;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Storage root (defaults to the configured one)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Latest-state view of a ledger history
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LedgerSummary {
    pub lines: usize,
    pub pending: usize,
    pub committed: usize,
    pub failed: usize,
    pub uploaded: usize,
    pub quarantined: usize,
    pub rows_durable: u64,
    pub bytes_durable: u64,
}

impl LedgerSummary {
    pub fn from_history(history: &[LedgerEntry]) -> Self {
        let mut latest: BTreeMap<SegmentId, &LedgerEntry> = BTreeMap::new();
        for entry in history {
            latest.insert(entry.segment, entry);
        }

        let mut summary = Self {
            lines: history.len(),
            ..Default::default()
        };
        for entry in latest.values() {
            match entry.state {
                LedgerState::Pending => summary.pending += 1,
                LedgerState::Committed => summary.committed += 1,
                LedgerState::Failed => summary.failed += 1,
                LedgerState::Uploaded => summary.uploaded += 1,
                LedgerState::Quarantined => summary.quarantined += 1,
            }
            if entry.state.is_durable() {
                summary.rows_durable += entry.row_count.unwrap_or(0);
                summary.bytes_durable += entry.byte_size.unwrap_or(0);
            }
        }
        summary
    }
}

impl StatusArgs {
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let root = self
            .output
            .clone()
            .unwrap_or_else(|| config.storage.root.clone());
        let layout = StorageLayout::new(root);
        let path = layout.ledger_path();

        println!("trade-capture status");
        println!("  Storage root: {}", layout.root().display());
        if !path.exists() {
            println!("  Ledger: none (nothing captured yet)");
            return Ok(());
        }

        let summary = LedgerSummary::from_history(&Ledger::read_history(&path)?);
        println!("  Ledger lines: {}", summary.lines);
        println!(
            "  Segments: {} uploaded, {} awaiting upload, {} failed, {} quarantined",
            summary.uploaded, summary.committed, summary.failed, summary.quarantined
        );
        if summary.pending > 0 {
            println!(
                "  Interrupted writes: {} (resolved on next start or `recover`)",
                summary.pending
            );
        }
        println!(
            "  Durable data: {} rows, {} bytes",
            summary.rows_durable, summary.bytes_durable
        );

        Ok(())
    }
}
