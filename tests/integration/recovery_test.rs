//! Crash recovery tests against a real storage root

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use trade_capture::config::Config;
use trade_capture::data::{Batch, ParquetSegmentWriter, SegmentId, StorageLayout};
use trade_capture::feed::{
    BinanceAggTradeParser, FeedError, MessageSource, MessageStream, Record, TradePayload,
};
use trade_capture::flush::commit_segment;
use trade_capture::ledger::{recover_storage, Ledger, LedgerEntry, LedgerState};
use trade_capture::pipeline::Pipeline;
use uuid::Uuid;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn batch(range: std::ops::RangeInclusive<u64>) -> Batch {
    let records = range
        .map(|seq| Record {
            source_id: "binance:BTCUSDT".to_string(),
            event_time: Utc
                .timestamp_millis_opt(1_704_067_200_000 + seq as i64)
                .unwrap(),
            sequence_id: seq,
            payload: TradePayload {
                price: dec!(42000.10),
                quantity: dec!(0.5),
                is_buyer_maker: false,
            },
        })
        .collect();
    Batch {
        partition: day(),
        records,
    }
}

/// Leave the storage root as a process killed mid-write would:
/// segment 1 committed, segment 2 PENDING with partial files and a torn
/// final ledger line.
fn simulate_crash(root: &Path) -> StorageLayout {
    let layout = StorageLayout::new(root);
    layout.ensure().unwrap();
    let run_id = Uuid::new_v4();
    let (ledger, _) = Ledger::open(layout.ledger_path()).unwrap();

    commit_segment(
        &ledger,
        &layout,
        &ParquetSegmentWriter::new(),
        &batch(1..=100),
        SegmentId::new(day(), 1),
        run_id,
    )
    .unwrap();

    let crashed = SegmentId::new(day(), 2);
    ledger
        .append(LedgerEntry::new(
            crashed,
            LedgerState::Pending,
            layout.relative_path(&crashed),
            run_id,
        ))
        .unwrap();
    fs::create_dir_all(layout.partition_dir(day())).unwrap();
    fs::write(layout.temp_path(&crashed), b"PAR1 half a row group").unwrap();
    fs::write(layout.final_path(&crashed), b"PAR1 half").unwrap();
    drop(ledger);

    let mut file = OpenOptions::new()
        .append(true)
        .open(layout.ledger_path())
        .unwrap();
    file.write_all(br#"{"segment":{"partition":"2024-01-01","sequ"#)
        .unwrap();

    layout
}

#[test]
fn test_interrupted_write_is_discarded() {
    let temp_dir = TempDir::new().unwrap();
    let layout = simulate_crash(temp_dir.path());
    let crashed = SegmentId::new(day(), 2);

    let (ledger, load) = Ledger::open(layout.ledger_path()).unwrap();
    assert_eq!(load.corrupt_lines, 1);
    assert!(load.quarantined_to.as_ref().unwrap().exists());

    let report = recover_storage(&ledger, &layout, Uuid::new_v4()).unwrap();
    assert_eq!(report.discarded, vec![crashed]);
    assert_eq!(report.temp_files_removed, 0);
    assert!(report.orphans.is_empty());
    assert_eq!(report.undispatched.len(), 1);
    assert_eq!(report.undispatched[0].row_count, 100);

    assert!(ledger.recover().is_empty());
    assert_eq!(ledger.latest(&crashed).unwrap().state, LedgerState::Failed);
    assert!(!layout.final_path(&crashed).exists());
    assert!(!layout.temp_path(&crashed).exists());

    // The discarded sequence number is never handed out again
    assert_eq!(ledger.next_sequence(day()), 3);
}

#[test]
fn test_recovery_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let layout = simulate_crash(temp_dir.path());

    {
        let (ledger, _) = Ledger::open(layout.ledger_path()).unwrap();
        recover_storage(&ledger, &layout, Uuid::new_v4()).unwrap();
    }

    let (ledger, load) = Ledger::open(layout.ledger_path()).unwrap();
    assert_eq!(load.corrupt_lines, 0);
    let report = recover_storage(&ledger, &layout, Uuid::new_v4()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.undispatched.len(), 1);
}

#[test]
fn test_stray_files_are_quarantined() {
    let temp_dir = TempDir::new().unwrap();
    let layout = simulate_crash(temp_dir.path());

    let stray = layout.final_path(&SegmentId::new(day(), 9));
    fs::write(&stray, b"PAR1 unknown").unwrap();
    let leftover = layout.temp_path(&SegmentId::new(day(), 10));
    fs::write(&leftover, b"PAR1").unwrap();

    let (ledger, _) = Ledger::open(layout.ledger_path()).unwrap();
    let report = recover_storage(&ledger, &layout, Uuid::new_v4()).unwrap();

    assert_eq!(report.orphans.len(), 1);
    assert!(report.orphans[0].starts_with(layout.quarantine_dir()));
    assert!(!stray.exists());
    assert!(!leftover.exists());
    assert_eq!(report.temp_files_removed, 1);
}

struct Unreachable;

#[async_trait]
impl MessageSource for Unreachable {
    async fn connect(&self) -> Result<Box<dyn MessageStream>, FeedError> {
        Err(FeedError::Connection("unreachable".to_string()))
    }
}

#[test]
fn test_pipeline_open_recovers_before_capture() {
    let temp_dir = TempDir::new().unwrap();
    let layout = simulate_crash(temp_dir.path());

    let mut config = Config::default();
    config.storage.root = temp_dir.path().to_path_buf();
    let pipeline = Pipeline::open(
        config,
        Arc::new(Unreachable),
        Arc::new(BinanceAggTradeParser::new()),
        Arc::new(ParquetSegmentWriter::new()),
        None,
    )
    .unwrap();

    let report = pipeline.recovery();
    assert_eq!(report.corrupt_lines, 1);
    assert_eq!(report.discarded.len(), 1);
    assert_eq!(report.undispatched.len(), 1);
    assert!(pipeline.ledger().recover().is_empty());
    assert!(!layout.final_path(&SegmentId::new(day(), 2)).exists());
}
