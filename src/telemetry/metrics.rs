//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Counter metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMetric {
    /// Raw messages read from the feed
    MessagesReceived,
    /// Messages dropped because they failed to parse
    ParseErrors,
    /// Sequence discontinuities observed
    SequenceGaps,
    /// Sequence ids skipped across all gaps
    MissingSequences,
    /// Successful feed connections
    FeedConnects,
    /// Feed disconnects (errors, timeouts, end-of-stream)
    FeedDisconnects,
    /// Records suppressed by the watermark
    RecordsDuplicate,
    /// Records evicted under drop-oldest
    RecordsEvicted,
    /// Records rejected under drop-newest
    RecordsRejected,
    /// Segments committed locally
    SegmentsCommitted,
    /// Segment writes that failed
    SegmentsFailed,
    /// Rows inside committed segments
    RowsCommitted,
    /// Remote put attempts
    UploadAttempts,
    /// Segments mirrored remotely
    UploadsDone,
    /// Transient upload failures scheduled for retry
    UploadRetries,
    /// Permanent upload failures
    UploadsRejected,
    /// Ledger entries or files moved aside
    Quarantined,
    /// Interrupted writes discarded at startup
    RecoveryDiscarded,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeMetric {
    /// Records currently buffered
    BufferItems,
    /// Estimated bytes currently buffered
    BufferBytes,
    /// Upload tasks not yet finished
    UploadsOutstanding,
}

/// Latency metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMetric {
    /// Writing, syncing and renaming one segment
    SegmentCommit,
    /// One remote put
    Upload,
}

impl CounterMetric {
    pub fn name(self) -> &'static str {
        match self {
            CounterMetric::MessagesReceived => "trade_capture_messages_received_total",
            CounterMetric::ParseErrors => "trade_capture_parse_errors_total",
            CounterMetric::SequenceGaps => "trade_capture_sequence_gaps_total",
            CounterMetric::MissingSequences => "trade_capture_missing_sequences_total",
            CounterMetric::FeedConnects => "trade_capture_feed_connects_total",
            CounterMetric::FeedDisconnects => "trade_capture_feed_disconnects_total",
            CounterMetric::RecordsDuplicate => "trade_capture_records_duplicate_total",
            CounterMetric::RecordsEvicted => "trade_capture_records_evicted_total",
            CounterMetric::RecordsRejected => "trade_capture_records_rejected_total",
            CounterMetric::SegmentsCommitted => "trade_capture_segments_committed_total",
            CounterMetric::SegmentsFailed => "trade_capture_segments_failed_total",
            CounterMetric::RowsCommitted => "trade_capture_rows_committed_total",
            CounterMetric::UploadAttempts => "trade_capture_upload_attempts_total",
            CounterMetric::UploadsDone => "trade_capture_uploads_done_total",
            CounterMetric::UploadRetries => "trade_capture_upload_retries_total",
            CounterMetric::UploadsRejected => "trade_capture_uploads_rejected_total",
            CounterMetric::Quarantined => "trade_capture_quarantined_total",
            CounterMetric::RecoveryDiscarded => "trade_capture_recovery_discarded_total",
        }
    }
}

impl GaugeMetric {
    pub fn name(self) -> &'static str {
        match self {
            GaugeMetric::BufferItems => "trade_capture_buffer_items",
            GaugeMetric::BufferBytes => "trade_capture_buffer_bytes",
            GaugeMetric::UploadsOutstanding => "trade_capture_uploads_outstanding",
        }
    }
}

impl LatencyMetric {
    pub fn name(self) -> &'static str {
        match self {
            LatencyMetric::SegmentCommit => "trade_capture_segment_commit_seconds",
            LatencyMetric::Upload => "trade_capture_upload_seconds",
        }
    }
}

/// Increment a counter
pub fn increment(metric: CounterMetric, value: u64) {
    metrics::counter!(metric.name()).increment(value);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    metrics::histogram!(metric.name()).record(duration.as_secs_f64());
}

/// Install the Prometheus exporter on `0.0.0.0:port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for metric in [
            CounterMetric::ParseErrors,
            CounterMetric::SegmentsCommitted,
            CounterMetric::UploadsRejected,
        ] {
            assert!(metric.name().starts_with("trade_capture_"));
            assert!(metric.name().ends_with("_total"));
        }
        assert_eq!(GaugeMetric::BufferItems.name(), "trade_capture_buffer_items");
        assert_eq!(LatencyMetric::Upload.name(), "trade_capture_upload_seconds");
    }

    #[test]
    fn test_emit_without_recorder_is_noop() {
        increment(CounterMetric::FeedConnects, 1);
        set_gauge(GaugeMetric::BufferBytes, 1.0);
        record_latency(LatencyMetric::SegmentCommit, Duration::from_millis(3));
    }
}
