//! Startup and shutdown coordination

use crate::buffer::IngestBuffer;
use crate::config::Config;
use crate::data::{SegmentWriter, StorageLayout};
use crate::feed::{FeedError, FeedReader, FeedStats, MessageSource, RecordParser, RecordSink};
use crate::flush::{BatchFlusher, FlusherStats};
use crate::ledger::{recover_storage, Ledger, LedgerError, RecoveryReport};
use crate::upload::{DispatcherStats, RemoteSink, UploadDispatcher};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Conditions that stop the pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage root {path:?} is unusable: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error("Pipeline task failed: {0}")]
    Task(#[from] JoinError),
}

/// Outcome of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub feed: FeedStats,
    pub flusher: FlusherStats,
    /// `None` when no remote sink is configured
    pub uploads: Option<DispatcherStats>,
    pub recovery: RecoveryReport,
    /// Whether the grace period ran out before everything drained
    pub forced: bool,
}

/// Owns one storage root and the activities writing into it
pub struct Pipeline {
    config: Config,
    layout: StorageLayout,
    ledger: Arc<Ledger>,
    recovery: RecoveryReport,
    source: Arc<dyn MessageSource>,
    parser: Arc<dyn RecordParser>,
    writer: Arc<dyn SegmentWriter>,
    sink: Option<Arc<dyn RemoteSink>>,
    run_id: Uuid,
}

impl Pipeline {
    /// Prepare the storage root, open the ledger and run recovery.
    ///
    /// Nothing is read from the source until `run`.
    pub fn open(
        config: Config,
        source: Arc<dyn MessageSource>,
        parser: Arc<dyn RecordParser>,
        writer: Arc<dyn SegmentWriter>,
        sink: Option<Arc<dyn RemoteSink>>,
    ) -> Result<Self, PipelineError> {
        let layout = StorageLayout::new(config.storage.root.clone());
        layout
            .ensure()
            .map_err(|source| PipelineError::StorageUnavailable {
                path: layout.root().to_path_buf(),
                source,
            })?;

        let run_id = Uuid::new_v4();
        let (ledger, load) = Ledger::open(layout.ledger_path())?;
        let mut recovery = recover_storage(&ledger, &layout, run_id)?;
        recovery.corrupt_lines = load.corrupt_lines;

        tracing::info!(
            run_id = %run_id,
            root = ?layout.root(),
            ledger_entries = load.entries,
            segments = load.segments,
            "Pipeline opened"
        );

        Ok(Self {
            config,
            layout,
            ledger: Arc::new(ledger),
            recovery,
            source,
            parser,
            writer,
            sink,
            run_id,
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Capture until `shutdown` is cancelled or the reader gives up.
    ///
    /// Shutdown stops the reader, lets the flusher drain the buffer, then
    /// waits for outstanding uploads; both waits share one grace period.
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineSummary, PipelineError> {
        let Pipeline {
            config,
            layout,
            ledger,
            recovery,
            source,
            parser,
            writer,
            sink,
            run_id,
        } = self;

        let buffer = Arc::new(IngestBuffer::new(config.buffer.clone()));
        let reader_cancel = shutdown.child_token();
        let flusher_stop = CancellationToken::new();
        let dispatcher_cancel = CancellationToken::new();

        let mut flusher = BatchFlusher::new(
            config.flush.clone(),
            layout,
            ledger.clone(),
            writer,
            run_id,
        );

        let dispatcher = match sink {
            Some(sink) => {
                let (committed_tx, committed_rx) = mpsc::unbounded_channel();
                flusher = flusher.with_publisher(committed_tx);
                let dispatcher = UploadDispatcher::new(&config.upload, sink, ledger.clone(), run_id);
                let backlog = recovery.undispatched.clone();
                let handle = tokio::spawn(dispatcher.clone().run(
                    backlog,
                    committed_rx,
                    dispatcher_cancel.clone(),
                ));
                Some((dispatcher, handle))
            }
            None => {
                if !recovery.undispatched.is_empty() {
                    tracing::warn!(
                        segments = recovery.undispatched.len(),
                        "Uploads disabled; committed segments remain local only"
                    );
                }
                None
            }
        };

        let mut flusher_handle = tokio::spawn(flusher.run(buffer.clone(), flusher_stop.clone()));

        let reader = Arc::new(FeedReader::new(
            config.feed.source_id(),
            source,
            parser,
            config.feed.clone(),
        ));
        let mut reader_handle = {
            let reader = reader.clone();
            let sink: Arc<dyn RecordSink> = buffer.clone();
            let cancel = reader_cancel.clone();
            tokio::spawn(async move { reader.run(sink, cancel).await })
        };

        tracing::info!(run_id = %run_id, source = %reader.source_id(), "Pipeline running");

        let finished = tokio::select! {
            _ = shutdown.cancelled() => None,
            result = &mut reader_handle => Some(result),
        };
        let reader_result = match finished {
            Some(result) => result?,
            None => {
                tracing::info!("Shutdown requested, stopping feed reader");
                reader_cancel.cancel();
                reader_handle.await?
            }
        };
        if let Err(e) = &reader_result {
            tracing::error!(error = %e, "Feed reader failed");
        }

        let deadline = Instant::now() + config.shutdown.grace_period();
        let mut forced = false;

        buffer.close();
        tracing::info!(buffered = buffer.len(), "Draining ingest buffer");

        let flusher = match timeout_at(deadline, &mut flusher_handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                forced = true;
                tracing::warn!(buffered = buffer.len(), "Grace period elapsed, forcing flusher stop");
                flusher_stop.cancel();
                flusher_handle.await?
            }
        };

        let uploads = match dispatcher {
            Some((dispatcher, mut handle)) => {
                tracing::info!(outstanding = dispatcher.outstanding(), "Waiting for uploads");
                let stats = match timeout_at(deadline, &mut handle).await {
                    Ok(joined) => joined?,
                    Err(_) => {
                        forced = true;
                        tracing::warn!(
                            outstanding = dispatcher.outstanding(),
                            "Grace period elapsed, leaving uploads for next start"
                        );
                        dispatcher_cancel.cancel();
                        handle.await?
                    }
                };
                Some(stats)
            }
            None => None,
        };

        let summary = PipelineSummary {
            run_id,
            feed: reader.stats().await,
            flusher,
            uploads,
            recovery,
            forced,
        };

        tracing::info!(
            run_id = %run_id,
            messages = summary.feed.messages,
            segments = summary.flusher.segments_committed,
            failed = summary.flusher.segments_failed,
            rows = summary.flusher.rows_committed,
            forced,
            "Pipeline stopped"
        );

        reader_result?;
        Ok(summary)
    }
}
