//! Recover command implementation

use crate::config::Config;
use crate::data::StorageLayout;
use crate::ledger::{recover_storage, Ledger};
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Args, Debug, Default)]
pub struct RecoverArgs {
    /// Storage root (defaults to the configured one)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RecoverArgs {
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let root = self
            .output
            .clone()
            .unwrap_or_else(|| config.storage.root.clone());
        let layout = StorageLayout::new(root);
        layout
            .ensure()
            .with_context(|| format!("Storage root {:?} is unusable", layout.root()))?;

        let (ledger, load) = Ledger::open(layout.ledger_path())?;
        let mut report = recover_storage(&ledger, &layout, Uuid::new_v4())?;
        report.corrupt_lines = load.corrupt_lines;

        println!("Recovery of {}", layout.root().display());
        println!("  Corrupt ledger lines: {}", report.corrupt_lines);
        if let Some(aside) = &load.quarantined_to {
            println!("    moved aside to {}", aside.display());
        }
        println!("  Interrupted writes discarded: {}", report.discarded.len());
        println!("  Segments quarantined: {}", report.quarantined.len());
        for id in &report.quarantined {
            println!("    {}", id);
        }
        println!("  Orphan files quarantined: {}", report.orphans.len());
        for path in &report.orphans {
            println!("    {}", path.display());
        }
        println!("  Temp files removed: {}", report.temp_files_removed);
        println!("  Segments awaiting upload: {}", report.undispatched.len());

        Ok(())
    }
}
