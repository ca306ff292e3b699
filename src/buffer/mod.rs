//! Bounded ingest buffer
//!
//! Decouples the feed reader from the batch flusher: capacity-bounded in both
//! items and bytes, FIFO, and de-duplicating by per-source sequence watermark.

mod ingest;
mod types;

pub use ingest::IngestBuffer;
pub use types::{Admission, BufferError};
