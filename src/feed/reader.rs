//! Feed reader: connect, pump, parse, hand off

use super::{FeedError, MessageSource, MessageStream, RecordParser, RecordSink};
use crate::buffer::{Admission, BufferError};
use crate::config::FeedConfig;
use crate::retry::Backoff;
use crate::telemetry::{increment, CounterMetric};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Reader statistics
#[derive(Debug, Default, Clone)]
pub struct FeedStats {
    pub connects: u64,
    pub disconnects: u64,
    pub messages: u64,
    pub parse_errors: u64,
    pub gaps: u64,
    pub missing_sequences: u64,
    pub duplicates: u64,
    pub overflows: u64,
}

enum PumpEnd {
    /// Cancellation requested
    Cancelled,
    /// Downstream buffer closed
    SinkClosed,
    /// Connection lost; reconnect
    Lost(FeedError),
}

/// Reads one upstream source into a record sink, reconnecting on failure
pub struct FeedReader {
    source_id: String,
    source: Arc<dyn MessageSource>,
    parser: Arc<dyn RecordParser>,
    config: FeedConfig,
    stats: Arc<RwLock<FeedStats>>,
}

impl FeedReader {
    pub fn new(
        source_id: impl Into<String>,
        source: Arc<dyn MessageSource>,
        parser: Arc<dyn RecordParser>,
        config: FeedConfig,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source,
            parser,
            config,
            stats: Arc::new(RwLock::new(FeedStats::default())),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Get current statistics
    pub async fn stats(&self) -> FeedStats {
        self.stats.read().await.clone()
    }

    /// Run until cancelled or the sink closes.
    ///
    /// Fails only when the source can't be reached during startup; later
    /// disconnects are retried with jittered backoff indefinitely.
    pub async fn run(
        &self,
        sink: Arc<dyn RecordSink>,
        cancel: CancellationToken,
    ) -> Result<(), FeedError> {
        let mut backoff = Backoff::full_jitter(self.config.reconnect_base(), self.config.reconnect_cap());
        let mut ever_connected = false;
        let mut startup_attempts = 0u32;
        let mut last_sequence: Option<u64> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let connected = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.source.connect() => result,
            };

            let stream = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    if !ever_connected {
                        startup_attempts += 1;
                        if startup_attempts >= self.config.initial_connect_attempts.max(1) {
                            tracing::error!(
                                source = %self.source_id,
                                attempts = startup_attempts,
                                error = %e,
                                "Giving up on initial connection"
                            );
                            return Err(FeedError::InitialConnectFailed {
                                attempts: startup_attempts,
                                last_error: e.to_string(),
                            });
                        }
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        source = %self.source_id,
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Connection failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            ever_connected = true;
            backoff.reset();
            self.stats.write().await.connects += 1;
            increment(CounterMetric::FeedConnects, 1);
            tracing::info!(source = %self.source_id, "Feed connected");

            match self.pump(stream, &sink, &cancel, &mut last_sequence).await {
                PumpEnd::Cancelled => return Ok(()),
                PumpEnd::SinkClosed => {
                    tracing::info!(source = %self.source_id, "Buffer closed, stopping reader");
                    return Ok(());
                }
                PumpEnd::Lost(e) => {
                    self.stats.write().await.disconnects += 1;
                    increment(CounterMetric::FeedDisconnects, 1);

                    let delay = backoff.next_delay();
                    tracing::warn!(
                        source = %self.source_id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Feed disconnected, reconnecting"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn pump(
        &self,
        mut stream: Box<dyn MessageStream>,
        sink: &Arc<dyn RecordSink>,
        cancel: &CancellationToken,
        last_sequence: &mut Option<u64>,
    ) -> PumpEnd {
        let read_timeout = self.config.read_timeout();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return PumpEnd::Cancelled,
                next = tokio::time::timeout(read_timeout, stream.read_next()) => next,
            };

            let raw = match next {
                Err(_) => return PumpEnd::Lost(FeedError::ReadTimeout(read_timeout)),
                Ok(Err(e)) => return PumpEnd::Lost(e),
                Ok(Ok(None)) => return PumpEnd::Lost(FeedError::Connection("end of stream".into())),
                Ok(Ok(Some(raw))) => raw,
            };

            self.stats.write().await.messages += 1;
            increment(CounterMetric::MessagesReceived, 1);

            let record = match self.parser.parse(&self.source_id, &raw) {
                Ok(record) => record,
                Err(e) => {
                    self.stats.write().await.parse_errors += 1;
                    increment(CounterMetric::ParseErrors, 1);
                    tracing::debug!(source = %self.source_id, error = %e, "Dropping unparseable message");
                    continue;
                }
            };

            if let Some(last) = *last_sequence {
                let missing = missing_between(last, record.sequence_id);
                if missing > 0 {
                    {
                        let mut stats = self.stats.write().await;
                        stats.gaps += 1;
                        stats.missing_sequences += missing;
                    }
                    increment(CounterMetric::SequenceGaps, 1);
                    increment(CounterMetric::MissingSequences, missing);
                    tracing::warn!(
                        source = %self.source_id,
                        last_sequence = last,
                        sequence = record.sequence_id,
                        missing,
                        "Sequence gap detected, data loss"
                    );
                }
            }
            let sequence = record.sequence_id;

            match sink.accept(record).await {
                Ok(Admission::Accepted) => {
                    *last_sequence = Some(last_sequence.map_or(sequence, |last| last.max(sequence)));
                }
                Ok(Admission::Duplicate) => {
                    self.stats.write().await.duplicates += 1;
                }
                Err(BufferError::Overflow { policy, evicted }) => {
                    *last_sequence = Some(last_sequence.map_or(sequence, |last| last.max(sequence)));
                    self.stats.write().await.overflows += 1;
                    tracing::warn!(
                        source = %self.source_id,
                        sequence,
                        policy = ?policy,
                        evicted,
                        "Buffer overflow, records dropped"
                    );
                }
                Err(BufferError::Closed) => return PumpEnd::SinkClosed,
            }
        }
    }
}

/// Sequence ids skipped between `last` and `next`; zero for overlaps
fn missing_between(last: u64, next: u64) -> u64 {
    next.saturating_sub(last).saturating_sub(1)
}
