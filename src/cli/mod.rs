//! CLI interface for trade-capture
//!
//! Provides subcommands for:
//! - `capture`: Stream trades into local segments and upload them
//! - `recover`: Run storage recovery without capturing
//! - `status`: Summarize the ledger of a storage root
//! - `config`: Show the effective configuration

mod capture;
mod recover;
mod status;

pub use capture::CaptureArgs;
pub use recover::RecoverArgs;
pub use status::StatusArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "trade-capture")]
#[command(about = "Durable, resumable market trade capture to Parquet segments")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Capture trades until the duration elapses or Ctrl-C
    Capture(CaptureArgs),
    /// Resolve interrupted writes and quarantine damaged state
    Recover(RecoverArgs),
    /// Show ledger state of a storage root
    Status(StatusArgs),
    /// Show the effective configuration
    Config,
}
