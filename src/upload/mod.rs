//! Upload dispatcher
//!
//! Mirrors committed segments to a remote object store with per-segment
//! retry. Delivery is at-least-once; remote keys are derived from the segment
//! id so a repeated upload overwrites rather than duplicates.

mod dispatcher;
mod sink;
mod types;

pub use dispatcher::{DispatcherStats, UploadDispatcher};
pub use sink::{ObjectStoreSink, RemoteSink};
pub use types::{SinkError, UploadState, UploadTask};
