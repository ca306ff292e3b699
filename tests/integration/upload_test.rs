//! Upload delivery tests against a local object store

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use trade_capture::config::{UploadBackend, UploadConfig};
use trade_capture::data::{remote_key, Batch, ParquetSegmentWriter, SegmentId, StorageLayout};
use trade_capture::feed::{Record, TradePayload};
use trade_capture::flush::commit_segment;
use trade_capture::ledger::{recover_storage, Ledger, LedgerState};
use trade_capture::upload::{ObjectStoreSink, RemoteSink, SinkError, UploadDispatcher};
use uuid::Uuid;

const PREFIX: &str = "msa-poc";

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn batch(rows: u64) -> Batch {
    let records = (1..=rows)
        .map(|seq| Record {
            source_id: "binance:ETHUSDT".to_string(),
            event_time: Utc
                .timestamp_millis_opt(1_704_067_200_000 + seq as i64)
                .unwrap(),
            sequence_id: seq,
            payload: TradePayload {
                price: dec!(2250.75),
                quantity: dec!(1.2),
                is_buyer_maker: true,
            },
        })
        .collect();
    Batch {
        partition: day(),
        records,
    }
}

fn upload_config(remote: &Path) -> UploadConfig {
    UploadConfig {
        backend: UploadBackend::Local,
        prefix: PREFIX.to_string(),
        local_dir: Some(remote.to_path_buf()),
        ..UploadConfig::default()
    }
}

fn committed_storage(root: &Path) -> (StorageLayout, Ledger, SegmentId) {
    let layout = StorageLayout::new(root);
    layout.ensure().unwrap();
    let (ledger, _) = Ledger::open(layout.ledger_path()).unwrap();
    let id = SegmentId::new(day(), 1);
    commit_segment(
        &ledger,
        &layout,
        &ParquetSegmentWriter::new(),
        &batch(50),
        id,
        Uuid::new_v4(),
    )
    .unwrap();
    (layout, ledger, id)
}

fn closed_channel<T>() -> mpsc::UnboundedReceiver<T> {
    let (_tx, rx) = mpsc::unbounded_channel();
    rx
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}

#[tokio::test]
async fn test_crash_after_put_redelivers_to_same_key() {
    let temp_dir = TempDir::new().unwrap();
    let remote_dir = temp_dir.path().join("remote");
    let (layout, ledger, id) = committed_storage(&temp_dir.path().join("capture"));
    let sink = Arc::new(ObjectStoreSink::local(&remote_dir).unwrap());

    // Put succeeded but the process died before recording it
    let key = remote_key(PREFIX, &id);
    sink.put(&layout.final_path(&id), &key).await.unwrap();
    drop(ledger);

    let (ledger, _) = Ledger::open(layout.ledger_path()).unwrap();
    let ledger = Arc::new(ledger);
    let run_id = Uuid::new_v4();
    let report = recover_storage(&ledger, &layout, run_id).unwrap();
    assert_eq!(report.undispatched.len(), 1);

    let dispatcher = UploadDispatcher::new(&upload_config(&remote_dir), sink, ledger.clone(), run_id);
    let stats = dispatcher
        .run(report.undispatched, closed_channel(), CancellationToken::new())
        .await;

    assert_eq!(stats.done, 1);
    assert_eq!(stats.attempts, 1);

    let objects = files_under(&remote_dir);
    assert_eq!(objects.len(), 1);
    assert!(objects[0].ends_with("msa-poc/dt=2024-01-01/segment-000001.parquet"));
    assert_eq!(
        std::fs::read(&objects[0]).unwrap(),
        std::fs::read(layout.final_path(&id)).unwrap()
    );

    let entry = ledger.latest(&id).unwrap();
    assert_eq!(entry.state, LedgerState::Uploaded);
    assert!(entry.remote_uri.unwrap().ends_with(&key));

    // Next start owes nothing
    assert!(ledger.undispatched().is_empty());
}

/// Fails transiently a fixed number of times, then delegates
struct FlakySink {
    inner: ObjectStoreSink,
    failures_left: Mutex<u32>,
    attempts: Mutex<Vec<Instant>>,
}

#[async_trait]
impl RemoteSink for FlakySink {
    async fn put(&self, local_path: &Path, remote_key: &str) -> Result<String, SinkError> {
        self.attempts.lock().unwrap().push(Instant::now());
        {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(SinkError::Transient("503 Slow Down".to_string()));
            }
        }
        self.inner.put(local_path, remote_key).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_then_succeed() {
    let temp_dir = TempDir::new().unwrap();
    let remote_dir = temp_dir.path().join("remote");
    let (layout, ledger, id) = committed_storage(&temp_dir.path().join("capture"));
    let ledger = Arc::new(ledger);

    let sink = Arc::new(FlakySink {
        inner: ObjectStoreSink::local(&remote_dir).unwrap(),
        failures_left: Mutex::new(2),
        attempts: Mutex::new(Vec::new()),
    });
    let segment = ledger.latest(&id).unwrap().to_segment(&layout).unwrap();

    let dispatcher = UploadDispatcher::new(
        &upload_config(&remote_dir),
        sink.clone(),
        ledger.clone(),
        Uuid::new_v4(),
    );
    let stats = dispatcher
        .run(vec![segment], closed_channel(), CancellationToken::new())
        .await;

    assert_eq!(stats.done, 1);
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.retries, 2);

    let attempts = sink.attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3);
    let first_gap = attempts[1] - attempts[0];
    let second_gap = attempts[2] - attempts[1];
    assert!(first_gap >= Duration::from_secs(2) && first_gap < Duration::from_secs(3));
    assert!(second_gap >= Duration::from_secs(4) && second_gap < Duration::from_secs(5));

    assert_eq!(ledger.latest(&id).unwrap().state, LedgerState::Uploaded);
    assert_eq!(files_under(&remote_dir).len(), 1);
}
