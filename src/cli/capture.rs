//! Capture command implementation

use crate::config::{Config, UploadBackend, UploadConfig};
use crate::data::ParquetSegmentWriter;
use crate::feed::{aggtrade_stream_url, BinanceAggTradeParser};
use crate::pipeline::Pipeline;
use crate::upload::{ObjectStoreSink, RemoteSink};
use crate::ws::{WsConfig, WsSource};
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capture duration when neither `--seconds` nor `--forever` is given
const DEFAULT_CAPTURE_SECS: u64 = 60;

#[derive(Args, Debug, Default)]
pub struct CaptureArgs {
    /// Trading pair symbol, e.g. btcusdt, ethusdt
    #[arg(short, long)]
    pub symbol: Option<String>,

    /// Collection duration in seconds
    #[arg(long, conflicts_with = "forever")]
    pub seconds: Option<u64>,

    /// Run until interrupted
    #[arg(long)]
    pub forever: bool,

    /// Local storage root
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// S3 bucket to upload segments to
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Remote key prefix
    #[arg(long)]
    pub s3_prefix: Option<String>,

    /// Upload to a local directory instead of S3
    #[arg(long, conflicts_with = "s3_bucket")]
    pub upload_dir: Option<PathBuf>,

    /// Maximum buffered records
    #[arg(long)]
    pub buffer_capacity: Option<usize>,

    /// Records per segment
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Seconds before a partial batch is flushed
    #[arg(long)]
    pub batch_timeout: Option<u64>,
}

impl CaptureArgs {
    /// Layer command-line overrides on top of the file configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(symbol) = &self.symbol {
            config.feed.symbol = symbol.clone();
        }
        if let Some(output) = &self.output {
            config.storage.root = output.clone();
        }
        if let Some(bucket) = &self.s3_bucket {
            config.upload.backend = UploadBackend::S3;
            config.upload.bucket = Some(bucket.clone());
        }
        if let Some(dir) = &self.upload_dir {
            config.upload.backend = UploadBackend::Local;
            config.upload.local_dir = Some(dir.clone());
        }
        if let Some(prefix) = &self.s3_prefix {
            config.upload.prefix = prefix.clone();
        }
        if let Some(capacity) = self.buffer_capacity {
            config.buffer.max_items = capacity;
        }
        if let Some(batch_size) = self.batch_size {
            config.flush.batch_size = batch_size;
        }
        if let Some(timeout) = self.batch_timeout {
            config.flush.max_wait_secs = timeout;
        }
    }

    /// How long to capture; `None` runs until interrupted
    pub fn duration(&self) -> Option<Duration> {
        if self.forever {
            None
        } else {
            Some(Duration::from_secs(self.seconds.unwrap_or(DEFAULT_CAPTURE_SECS)))
        }
    }

    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        self.apply(&mut config);

        let url = config
            .feed
            .url
            .clone()
            .unwrap_or_else(|| aggtrade_stream_url(&config.feed.symbol));
        let source = Arc::new(WsSource::new(
            WsConfig::new(url).ping_interval(config.feed.ping_interval()),
        ));
        let sink = build_sink(&config.upload)?;

        let pipeline = Pipeline::open(
            config,
            source,
            Arc::new(BinanceAggTradeParser::new()),
            Arc::new(ParquetSegmentWriter::new()),
            sink,
        )?;

        let recovery = pipeline.recovery();
        if !recovery.is_clean() {
            tracing::warn!(
                discarded = recovery.discarded.len(),
                quarantined = recovery.quarantined.len(),
                orphans = recovery.orphans.len(),
                corrupt_lines = recovery.corrupt_lines,
                "Started in degraded mode after recovery"
            );
        }

        let shutdown = CancellationToken::new();
        tokio::spawn(wait_for_shutdown(shutdown.clone(), self.duration()));

        let summary = pipeline.run(shutdown).await?;

        println!("Capture finished (run {})", summary.run_id);
        println!("  Messages: {}", summary.feed.messages);
        println!(
            "  Segments: {} committed, {} failed, {} rows",
            summary.flusher.segments_committed,
            summary.flusher.segments_failed,
            summary.flusher.rows_committed
        );
        if let Some(uploads) = &summary.uploads {
            println!(
                "  Uploads: {} done, {} rejected, {} left for next start",
                uploads.done, uploads.rejected, uploads.abandoned
            );
        }
        if summary.feed.gaps > 0 {
            println!(
                "  Data loss: {} gaps, {} missing sequences",
                summary.feed.gaps, summary.feed.missing_sequences
            );
        }

        Ok(())
    }
}

/// Remote sink from the upload configuration, if one is configured
pub fn build_sink(config: &UploadConfig) -> anyhow::Result<Option<Arc<dyn RemoteSink>>> {
    let sink = match (config.backend, &config.bucket, &config.local_dir) {
        (UploadBackend::S3, Some(bucket), _) => ObjectStoreSink::s3(bucket, config.region.as_deref())
            .with_context(|| format!("Failed to configure S3 bucket {}", bucket))?,
        (UploadBackend::Local, _, Some(dir)) => ObjectStoreSink::local(dir)
            .with_context(|| format!("Failed to configure upload directory {:?}", dir))?,
        _ => {
            tracing::info!("No remote sink configured, uploads disabled");
            return Ok(None);
        }
    };

    tracing::info!(remote = %sink.uri_base(), prefix = %config.prefix, "Uploading segments");
    Ok(Some(Arc::new(sink)))
}

async fn wait_for_shutdown(shutdown: CancellationToken, duration: Option<Duration>) {
    let timer = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(signal = "SIGINT", "Received signal, initiating graceful shutdown");
        }
        _ = timer => {
            tracing::info!("Capture duration elapsed, initiating graceful shutdown");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
