//! End-to-end pipeline tests with a scripted feed and an in-memory sink

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use trade_capture::config::Config;
use trade_capture::data::{read_segment, ParquetSegmentWriter};
use trade_capture::feed::{BinanceAggTradeParser, FeedError, MessageSource, MessageStream};
use trade_capture::ledger::{Ledger, LedgerState};
use trade_capture::pipeline::Pipeline;
use trade_capture::upload::{RemoteSink, SinkError};

/// 2024-01-01T00:00:00Z
const DAY_START_MS: i64 = 1_704_067_200_000;

fn agg_trade(seq: u64, event_ms: i64) -> String {
    format!(
        r#"{{"e":"aggTrade","E":{},"s":"BTCUSDT","a":{},"p":"42500.50","q":"0.010","f":1,"l":1,"T":{},"m":{}}}"#,
        event_ms,
        seq,
        event_ms,
        seq % 2 == 0
    )
}

/// Plays a fixed list of messages once, then stays silent
struct ScriptedFeed {
    messages: Mutex<Option<Vec<String>>>,
    exhausted: Arc<AtomicBool>,
}

impl ScriptedFeed {
    fn new(messages: Vec<String>) -> Self {
        Self {
            messages: Mutex::new(Some(messages)),
            exhausted: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct ScriptedStream {
    messages: VecDeque<String>,
    exhausted: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSource for ScriptedFeed {
    async fn connect(&self) -> Result<Box<dyn MessageStream>, FeedError> {
        let messages = self.messages.lock().unwrap().take().unwrap_or_default();
        Ok(Box::new(ScriptedStream {
            messages: messages.into(),
            exhausted: self.exhausted.clone(),
        }))
    }
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn read_next(&mut self) -> Result<Option<String>, FeedError> {
        match self.messages.pop_front() {
            Some(message) => Ok(Some(message)),
            None => {
                self.exhausted.store(true, Ordering::SeqCst);
                std::future::pending().await
            }
        }
    }
}

/// Remote sink that counts puts per key
#[derive(Default)]
struct MemorySink {
    puts: Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl RemoteSink for MemorySink {
    async fn put(&self, local_path: &Path, remote_key: &str) -> Result<String, SinkError> {
        if !local_path.exists() {
            return Err(SinkError::Permanent(format!("missing {}", local_path.display())));
        }
        *self.puts.lock().unwrap().entry(remote_key.to_string()).or_default() += 1;
        Ok(format!("mem://{}", remote_key))
    }
}

fn config(root: &Path, batch_size: usize) -> Config {
    let mut config = Config::default();
    config.storage.root = root.to_path_buf();
    config.flush.batch_size = batch_size;
    config.flush.max_wait_secs = 60;
    config.feed.read_timeout_secs = 300;
    config.upload.prefix = "msa-poc".to_string();
    config
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_25k_records_make_three_segments() {
    let temp_dir = TempDir::new().unwrap();
    let messages = (1..=25_000u64)
        .map(|seq| agg_trade(seq, DAY_START_MS + seq as i64))
        .collect();
    let feed = Arc::new(ScriptedFeed::new(messages));
    let exhausted = feed.exhausted.clone();
    let sink = Arc::new(MemorySink::default());

    let pipeline = Pipeline::open(
        config(temp_dir.path(), 10_000),
        feed,
        Arc::new(BinanceAggTradeParser::new()),
        Arc::new(ParquetSegmentWriter::new()),
        Some(sink.clone() as Arc<dyn RemoteSink>),
    )
    .unwrap();
    let ledger = pipeline.ledger().clone();
    let layout = pipeline.layout().clone();

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(pipeline.run(shutdown.clone()));

    wait_until(|| exhausted.load(Ordering::SeqCst)).await;
    shutdown.cancel();
    let summary = run.await.unwrap().unwrap();

    assert!(!summary.forced);
    assert_eq!(summary.feed.messages, 25_000);
    assert_eq!(summary.flusher.segments_committed, 3);
    assert_eq!(summary.flusher.rows_committed, 25_000);
    assert_eq!(summary.uploads.as_ref().unwrap().done, 3);

    let history = Ledger::read_history(layout.ledger_path()).unwrap();
    let committed: Vec<u64> = history
        .iter()
        .filter(|e| e.state == LedgerState::Committed)
        .map(|e| e.row_count.unwrap())
        .collect();
    assert_eq!(committed, vec![10_000, 10_000, 5_000]);

    let latest = ledger.snapshot();
    assert_eq!(latest.len(), 3);
    assert!(latest.iter().all(|e| e.state == LedgerState::Uploaded));

    let puts = sink.puts.lock().unwrap();
    assert_eq!(puts.len(), 3);
    assert!(puts.values().all(|&n| n == 1));
    assert!(puts.contains_key("msa-poc/dt=2024-01-01/segment-000001.parquet"));

    // Order is preserved across segments
    let mut expected = 1u64;
    for entry in &latest {
        for record in read_segment(&layout.resolve(&entry.path)).unwrap() {
            assert_eq!(record.sequence_id, expected);
            expected += 1;
        }
    }
    assert_eq!(expected, 25_001);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_midnight_split_and_duplicates() {
    let temp_dir = TempDir::new().unwrap();
    let before_midnight = DAY_START_MS + 86_400_000 - 10;
    let after_midnight = DAY_START_MS + 86_400_000 + 10;
    let messages = vec![
        agg_trade(1, before_midnight),
        agg_trade(2, before_midnight + 1),
        agg_trade(2, before_midnight + 1),
        "not json".to_string(),
        agg_trade(3, after_midnight),
        agg_trade(1, before_midnight),
        agg_trade(4, after_midnight + 1),
    ];
    let feed = Arc::new(ScriptedFeed::new(messages));
    let exhausted = feed.exhausted.clone();

    let pipeline = Pipeline::open(
        config(temp_dir.path(), 100),
        feed,
        Arc::new(BinanceAggTradeParser::new()),
        Arc::new(ParquetSegmentWriter::new()),
        None,
    )
    .unwrap();
    let ledger = pipeline.ledger().clone();
    let layout = pipeline.layout().clone();

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(pipeline.run(shutdown.clone()));
    wait_until(|| exhausted.load(Ordering::SeqCst)).await;
    shutdown.cancel();
    let summary = run.await.unwrap().unwrap();

    assert!(summary.uploads.is_none());
    assert_eq!(summary.feed.parse_errors, 1);
    assert_eq!(summary.flusher.segments_committed, 2);
    assert_eq!(summary.flusher.rows_committed, 4);

    let segments = ledger.undispatched();
    assert_eq!(segments.len(), 2);
    assert_ne!(segments[0].segment.partition, segments[1].segment.partition);
    for entry in segments {
        let records = read_segment(&layout.resolve(&entry.path)).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.partition_key() == entry.segment.partition));
    }
}
