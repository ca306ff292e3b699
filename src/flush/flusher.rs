//! Drain loop and segment commit protocol

use super::split_by_partition;
use crate::buffer::IngestBuffer;
use crate::config::FlushConfig;
use crate::data::{
    Batch, Segment, SegmentId, SegmentWriteError, SegmentWriter, StorageLayout, WrittenFile,
};
use crate::ledger::{EntryLog, Ledger, LedgerEntry, LedgerError, LedgerState};
use crate::telemetry::{increment, record_latency, CounterMetric, LatencyMetric};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Local write failure for one batch
#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Write(#[from] SegmentWriteError),
    #[error("Segment I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Commit task failed: {0}")]
    Task(String),
}

/// Flusher statistics
#[derive(Debug, Default, Clone)]
pub struct FlusherStats {
    pub batches: u64,
    pub segments_committed: u64,
    pub segments_failed: u64,
    pub rows_committed: u64,
    /// Records still buffered when a forced stop arrived
    pub records_abandoned: u64,
    pub last_commit: Option<DateTime<Utc>>,
}

/// Turns buffered records into committed segments
pub struct BatchFlusher {
    config: FlushConfig,
    layout: StorageLayout,
    ledger: Arc<Ledger>,
    writer: Arc<dyn SegmentWriter>,
    committed_tx: Option<mpsc::UnboundedSender<Segment>>,
    run_id: Uuid,
    stats: FlusherStats,
}

impl BatchFlusher {
    pub fn new(
        config: FlushConfig,
        layout: StorageLayout,
        ledger: Arc<Ledger>,
        writer: Arc<dyn SegmentWriter>,
        run_id: Uuid,
    ) -> Self {
        Self {
            config,
            layout,
            ledger,
            writer,
            committed_tx: None,
            run_id,
            stats: FlusherStats::default(),
        }
    }

    /// Publish every committed segment on `tx`
    pub fn with_publisher(mut self, tx: mpsc::UnboundedSender<Segment>) -> Self {
        self.committed_tx = Some(tx);
        self
    }

    /// Drain and commit until the buffer is closed and empty.
    ///
    /// Cancelling `stop` is a forced stop: the batch in progress finishes, and
    /// anything still buffered is abandoned.
    pub async fn run(mut self, buffer: Arc<IngestBuffer>, stop: CancellationToken) -> FlusherStats {
        let batch_size = self.config.batch_size.max(1);
        let max_wait = self.config.max_wait();

        tracing::info!(batch_size, max_wait_ms = max_wait.as_millis() as u64, "Batch flusher started");

        loop {
            if stop.is_cancelled() {
                self.abandon(&buffer);
                break;
            }

            let records = tokio::select! {
                _ = stop.cancelled() => {
                    self.abandon(&buffer);
                    break;
                }
                records = buffer.drain(batch_size, max_wait) => records,
            };

            if records.is_empty() {
                if buffer.is_closed() {
                    break;
                }
                continue;
            }

            for batch in split_by_partition(records) {
                // Failures are logged and counted by flush_batch; keep draining
                if let Err(e) = self.flush_batch(batch).await {
                    tracing::debug!(error = %e, "Continuing after failed batch");
                }
            }
        }

        tracing::info!(
            committed = self.stats.segments_committed,
            failed = self.stats.segments_failed,
            rows = self.stats.rows_committed,
            "Batch flusher stopped"
        );
        self.stats
    }

    fn abandon(&mut self, buffer: &IngestBuffer) {
        let left = buffer.len();
        if left > 0 {
            self.stats.records_abandoned += left as u64;
            tracing::warn!(records = left, "Flusher force-stopped with records still buffered");
        }
    }

    /// Commit one batch as the next segment of its partition
    pub async fn flush_batch(&mut self, batch: Batch) -> Result<Segment, FlushError> {
        self.stats.batches += 1;
        let id = SegmentId::new(batch.partition, self.ledger.next_sequence(batch.partition));
        let rows = batch.len();
        let started = Instant::now();

        let ledger = self.ledger.clone();
        let layout = self.layout.clone();
        let writer = self.writer.clone();
        let run_id = self.run_id;
        let result = tokio::task::spawn_blocking(move || {
            commit_segment(ledger.as_ref(), &layout, writer.as_ref(), &batch, id, run_id)
        })
        .await
        .map_err(|e| FlushError::Task(e.to_string()))
        .and_then(|r| r);

        match result {
            Ok(segment) => {
                let elapsed = started.elapsed();
                record_latency(LatencyMetric::SegmentCommit, elapsed);
                increment(CounterMetric::SegmentsCommitted, 1);
                increment(CounterMetric::RowsCommitted, segment.row_count);
                self.stats.segments_committed += 1;
                self.stats.rows_committed += segment.row_count;
                self.stats.last_commit = Some(Utc::now());

                tracing::info!(
                    segment = %segment.id,
                    rows = segment.row_count,
                    bytes = segment.byte_size,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Segment committed"
                );

                if let Some(tx) = &self.committed_tx {
                    if tx.send(segment.clone()).is_err() {
                        tracing::debug!(segment = %segment.id, "Upload dispatcher gone, not publishing");
                    }
                }
                Ok(segment)
            }
            Err(e) => {
                increment(CounterMetric::SegmentsFailed, 1);
                self.stats.segments_failed += 1;
                tracing::error!(
                    segment = %id,
                    rows,
                    error = %e,
                    "Local write failure, batch discarded"
                );
                Err(e)
            }
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = ?path, error = %e, "Failed to remove partial segment file");
        }
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

fn write_and_publish(
    layout: &StorageLayout,
    writer: &dyn SegmentWriter,
    batch: &Batch,
    id: &SegmentId,
) -> Result<WrittenFile, FlushError> {
    let temp = layout.temp_path(id);
    let final_path = layout.final_path(id);

    let written = writer.write(batch, &temp)?;
    fs::rename(&temp, &final_path)?;
    sync_dir(&layout.partition_dir(id.partition))?;
    Ok(written)
}

/// Ledger-guarded segment commit.
///
/// PENDING is durable before any byte of the segment is written, and
/// COMMITTED only after the final file and its directory entry are synced.
/// On failure partial files are removed and FAILED is appended.
pub fn commit_segment(
    ledger: &dyn EntryLog,
    layout: &StorageLayout,
    writer: &dyn SegmentWriter,
    batch: &Batch,
    id: SegmentId,
    run_id: Uuid,
) -> Result<Segment, FlushError> {
    let pending = LedgerEntry::new(id, LedgerState::Pending, layout.relative_path(&id), run_id);
    ledger.append(pending.clone())?;

    let written = match write_and_publish(layout, writer, batch, &id) {
        Ok(written) => written,
        Err(e) => {
            remove_quietly(&layout.temp_path(&id));
            remove_quietly(&layout.final_path(&id));
            ledger.append(
                pending
                    .transition(LedgerState::Failed, run_id)
                    .with_error(e.to_string()),
            )?;
            return Err(e);
        }
    };

    let committed = pending
        .transition(LedgerState::Committed, run_id)
        .with_file(&written);
    if let Err(e) = ledger.append(committed) {
        // Unrecorded file must not outlive its PENDING entry
        remove_quietly(&layout.final_path(&id));
        let failed = pending
            .transition(LedgerState::Failed, run_id)
            .with_error(format!("commit not recorded: {}", e));
        if let Err(again) = ledger.append(failed) {
            tracing::error!(segment = %id, error = %again, "Could not record failed commit");
        }
        return Err(e.into());
    }

    Ok(Segment {
        id,
        path: layout.final_path(&id),
        row_count: written.row_count,
        byte_size: written.byte_size,
        checksum: written.checksum,
    })
}
