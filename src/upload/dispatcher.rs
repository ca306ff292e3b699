//! Per-segment upload tasks with retry

use super::{RemoteSink, SinkError, UploadState, UploadTask};
use crate::config::UploadConfig;
use crate::data::{remote_key, Segment};
use crate::ledger::{Ledger, LedgerState};
use crate::retry::Backoff;
use crate::telemetry::{
    increment, record_latency, set_gauge, CounterMetric, GaugeMetric, LatencyMetric,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Dispatcher statistics
#[derive(Debug, Default, Clone)]
pub struct DispatcherStats {
    pub enqueued: u64,
    pub done: u64,
    pub rejected: u64,
    pub attempts: u64,
    pub retries: u64,
    /// Uploads still outstanding when the dispatcher was cancelled
    pub abandoned: u64,
}

struct Shared {
    sink: Arc<dyn RemoteSink>,
    ledger: Arc<Ledger>,
    prefix: String,
    retry_base: Duration,
    retry_cap: Duration,
    permits: Semaphore,
    outstanding: AtomicUsize,
    run_id: Uuid,
}

/// Decrements the outstanding count however the task ends
struct OutstandingGuard(Arc<Shared>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        let left = self.0.outstanding.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        set_gauge(GaugeMetric::UploadsOutstanding, left as f64);
    }
}

/// Uploads committed segments, isolating failures per segment
#[derive(Clone)]
pub struct UploadDispatcher {
    shared: Arc<Shared>,
}

impl UploadDispatcher {
    pub fn new(
        config: &UploadConfig,
        sink: Arc<dyn RemoteSink>,
        ledger: Arc<Ledger>,
        run_id: Uuid,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                ledger,
                prefix: config.prefix.clone(),
                retry_base: config.retry_base(),
                retry_cap: config.retry_cap(),
                permits: Semaphore::new(config.max_in_flight.max(1)),
                outstanding: AtomicUsize::new(0),
                run_id,
            }),
        }
    }

    /// Segments accepted but not yet done or rejected
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    /// Upload the recovery `backlog`, then every segment arriving on
    /// `committed`, until the channel closes and all uploads finish.
    ///
    /// Cancelling aborts in-flight work; those segments stay COMMITTED in the
    /// ledger and are picked up again on the next start.
    pub async fn run(
        self,
        backlog: Vec<Segment>,
        mut committed: mpsc::UnboundedReceiver<Segment>,
        cancel: CancellationToken,
    ) -> DispatcherStats {
        let mut tasks = JoinSet::new();
        let mut stats = DispatcherStats::default();
        let mut channel_open = true;

        if !backlog.is_empty() {
            tracing::info!(segments = backlog.len(), "Re-dispatching undispatched segments");
        }
        for segment in backlog {
            self.spawn(&mut tasks, segment);
            stats.enqueued += 1;
        }

        loop {
            if !channel_open && tasks.is_empty() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    let left = self.outstanding();
                    tasks.shutdown().await;
                    stats.abandoned = left as u64;
                    if left > 0 {
                        tracing::warn!(outstanding = left, "Upload dispatcher cancelled, uploads left for next start");
                    }
                    break;
                }
                segment = committed.recv(), if channel_open => match segment {
                    Some(segment) => {
                        self.spawn(&mut tasks, segment);
                        stats.enqueued += 1;
                    }
                    None => channel_open = false,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                    Ok(task) => {
                        stats.attempts += task.attempts as u64;
                        stats.retries += task.attempts.saturating_sub(1) as u64;
                        match task.state {
                            UploadState::Done => stats.done += 1,
                            UploadState::Rejected => stats.rejected += 1,
                            _ => {}
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Upload task panicked"),
                },
            }
        }

        tracing::info!(
            done = stats.done,
            rejected = stats.rejected,
            retries = stats.retries,
            abandoned = stats.abandoned,
            "Upload dispatcher stopped"
        );
        stats
    }

    fn spawn(&self, tasks: &mut JoinSet<UploadTask>, segment: Segment) {
        let count = self.shared.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        set_gauge(GaugeMetric::UploadsOutstanding, count as f64);

        let guard = OutstandingGuard(self.shared.clone());
        let shared = self.shared.clone();
        tasks.spawn(async move {
            let _guard = guard;
            upload_segment(shared, segment).await
        });
    }
}

async fn upload_segment(shared: Arc<Shared>, segment: Segment) -> UploadTask {
    let key = remote_key(&shared.prefix, &segment.id);
    let mut task = UploadTask::new(segment, key);
    let mut backoff = Backoff::exponential(shared.retry_base, shared.retry_cap);

    loop {
        let result = {
            let _permit = match shared.permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => return task,
            };
            task.state = UploadState::InFlight;
            task.attempts += 1;
            increment(CounterMetric::UploadAttempts, 1);

            let started = Instant::now();
            let result = shared.sink.put(&task.segment.path, &task.remote_key).await;
            record_latency(LatencyMetric::Upload, started.elapsed());
            result
        };

        match result {
            Ok(uri) => {
                task.state = UploadState::Done;
                task.remote_uri = Some(uri.clone());
                increment(CounterMetric::UploadsDone, 1);
                mark_uploaded(&shared, &task, uri).await;
                return task;
            }
            Err(SinkError::Permanent(msg)) => {
                task.state = UploadState::Rejected;
                task.last_error = Some(SinkError::Permanent(msg.clone()));
                increment(CounterMetric::UploadsRejected, 1);
                tracing::error!(
                    segment = %task.segment.id,
                    key = %task.remote_key,
                    attempts = task.attempts,
                    error = %msg,
                    "Upload rejected by remote sink, operator action required"
                );
                return task;
            }
            Err(err) => {
                let delay = backoff.next_delay();
                task.state = UploadState::RetryScheduled;
                increment(CounterMetric::UploadRetries, 1);
                tracing::warn!(
                    segment = %task.segment.id,
                    attempt = task.attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "Upload failed, retrying"
                );
                task.last_error = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn mark_uploaded(shared: &Arc<Shared>, task: &UploadTask, uri: String) {
    let Some(entry) = shared.ledger.latest(&task.segment.id) else {
        tracing::warn!(segment = %task.segment.id, "Uploaded segment has no ledger entry");
        return;
    };

    let ledger = shared.ledger.clone();
    let done = entry
        .transition(LedgerState::Uploaded, shared.run_id)
        .with_remote_uri(uri.clone());
    match tokio::task::spawn_blocking(move || ledger.append(done)).await {
        Ok(Ok(())) => tracing::info!(
            segment = %task.segment.id,
            uri = %uri,
            attempts = task.attempts,
            "Segment uploaded"
        ),
        Ok(Err(e)) => tracing::error!(
            segment = %task.segment.id,
            error = %e,
            "Uploaded but could not record it; will re-upload on next start"
        ),
        Err(e) => tracing::error!(segment = %task.segment.id, error = %e, "Ledger task failed"),
    }
}
