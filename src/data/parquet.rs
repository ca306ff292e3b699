//! Parquet segment writer and reader

use super::{Batch, WrittenFile};
use crate::feed::{Record, TradePayload};
use arrow::array::{
    ArrayRef, BooleanArray, StringArray, TimestampMillisecondArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Local segment write failures
#[derive(Debug, Error)]
pub enum SegmentWriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
    #[error("Refusing to write an empty batch")]
    EmptyBatch,
    #[error("Invalid segment data: {0}")]
    Invalid(String),
}

/// Persists a batch as a columnar file
pub trait SegmentWriter: Send + Sync {
    /// Write `batch` to `destination`; on success all bytes are synced to disk
    fn write(&self, batch: &Batch, destination: &Path) -> Result<WrittenFile, SegmentWriteError>;
}

/// Trade segment schema
pub fn segment_schema() -> Schema {
    Schema::new(vec![
        Field::new("source_id", DataType::Utf8, false),
        Field::new(
            "event_time",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("sequence_id", DataType::UInt64, false),
        Field::new("price", DataType::Utf8, false), // Store as string for Decimal precision
        Field::new("quantity", DataType::Utf8, false),
        Field::new("is_buyer_maker", DataType::Boolean, false),
    ])
}

/// SNAPPY-compressed Parquet writer
#[derive(Debug, Clone)]
pub struct ParquetSegmentWriter {
    compression: Compression,
}

impl Default for ParquetSegmentWriter {
    fn default() -> Self {
        Self {
            compression: Compression::SNAPPY,
        }
    }
}

impl ParquetSegmentWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn to_record_batch(records: &[Record]) -> Result<RecordBatch, ArrowError> {
        let schema = Arc::new(segment_schema());

        let sources: Vec<&str> = records.iter().map(|r| r.source_id.as_str()).collect();
        let event_times: Vec<i64> = records
            .iter()
            .map(|r| r.event_time.timestamp_millis())
            .collect();
        let sequences: Vec<u64> = records.iter().map(|r| r.sequence_id).collect();
        let prices: Vec<String> = records.iter().map(|r| r.payload.price.to_string()).collect();
        let quantities: Vec<String> = records
            .iter()
            .map(|r| r.payload.quantity.to_string())
            .collect();
        let makers: Vec<bool> = records.iter().map(|r| r.payload.is_buyer_maker).collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(sources)) as ArrayRef,
                Arc::new(TimestampMillisecondArray::from(event_times).with_timezone("UTC"))
                    as ArrayRef,
                Arc::new(UInt64Array::from(sequences)) as ArrayRef,
                Arc::new(StringArray::from(
                    prices.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                )) as ArrayRef,
                Arc::new(StringArray::from(
                    quantities.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                )) as ArrayRef,
                Arc::new(BooleanArray::from(makers)) as ArrayRef,
            ],
        )
    }
}

impl SegmentWriter for ParquetSegmentWriter {
    fn write(&self, batch: &Batch, destination: &Path) -> Result<WrittenFile, SegmentWriteError> {
        if batch.is_empty() {
            return Err(SegmentWriteError::EmptyBatch);
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let record_batch = Self::to_record_batch(&batch.records)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .build();

        let file = File::create(destination)?;
        let mut writer = ArrowWriter::try_new(file, record_batch.schema(), Some(props))?;
        writer.write(&record_batch)?;
        let file = writer.into_inner()?;
        file.sync_all()?;

        let byte_size = fs::metadata(destination)?.len();
        let checksum = checksum_file(destination)?;

        tracing::debug!(
            path = ?destination,
            rows = batch.len(),
            byte_size,
            "Wrote segment to Parquet"
        );

        Ok(WrittenFile {
            row_count: batch.len() as u64,
            byte_size,
            checksum,
        })
    }
}

/// Hex SHA-256 of a file
pub fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Read every record back from a segment file
pub fn read_segment(path: &Path) -> Result<Vec<Record>, SegmentWriteError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;

        let sources = column::<StringArray>(&batch, 0, "source_id")?;
        let event_times = column::<TimestampMillisecondArray>(&batch, 1, "event_time")?;
        let sequences = column::<UInt64Array>(&batch, 2, "sequence_id")?;
        let prices = column::<StringArray>(&batch, 3, "price")?;
        let quantities = column::<StringArray>(&batch, 4, "quantity")?;
        let makers = column::<BooleanArray>(&batch, 5, "is_buyer_maker")?;

        for i in 0..batch.num_rows() {
            let event_time = DateTime::from_timestamp_millis(event_times.value(i))
                .ok_or_else(|| SegmentWriteError::Invalid("event_time out of range".into()))?;
            let price = Decimal::from_str(prices.value(i))
                .map_err(|e| SegmentWriteError::Invalid(e.to_string()))?;
            let quantity = Decimal::from_str(quantities.value(i))
                .map_err(|e| SegmentWriteError::Invalid(e.to_string()))?;

            records.push(Record {
                source_id: sources.value(i).to_string(),
                event_time,
                sequence_id: sequences.value(i),
                payload: TradePayload {
                    price,
                    quantity,
                    is_buyer_maker: makers.value(i),
                },
            });
        }
    }

    Ok(records)
}

fn column<'a, T: 'static>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> Result<&'a T, SegmentWriteError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| SegmentWriteError::Invalid(format!("Invalid {} column", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn batch(count: u64) -> Batch {
        let records = (1..=count)
            .map(|seq| Record {
                source_id: "binance:BTCUSDT".to_string(),
                event_time: Utc.timestamp_millis_opt(1_704_067_200_000 + seq as i64).unwrap(),
                sequence_id: seq,
                payload: TradePayload {
                    price: dec!(42500.50) + Decimal::from(seq),
                    quantity: dec!(0.001),
                    is_buyer_maker: seq % 2 == 0,
                },
            })
            .collect();
        Batch {
            partition: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            records,
        }
    }

    #[test]
    fn test_segment_schema() {
        let schema = segment_schema();
        assert_eq!(schema.fields().len(), 6);
        assert_eq!(schema.field(0).name(), "source_id");
        assert_eq!(schema.field(2).name(), "sequence_id");
        assert_eq!(schema.field(5).name(), "is_buyer_maker");
    }

    #[test]
    fn test_write_and_read_segment() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dt=2024-01-01").join("segment-000001.parquet");
        let batch = batch(3);

        let written = ParquetSegmentWriter::new().write(&batch, &path).unwrap();
        assert_eq!(written.row_count, 3);
        assert_eq!(written.byte_size, fs::metadata(&path).unwrap().len());
        assert_eq!(written.checksum.len(), 64);
        assert_eq!(written.checksum, checksum_file(&path).unwrap());

        let records = read_segment(&path).unwrap();
        assert_eq!(records, batch.records);
    }

    #[test]
    fn test_write_empty_batch_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("segment-000001.parquet");
        let empty = Batch {
            partition: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            records: vec![],
        };

        let result = ParquetSegmentWriter::new().write(&empty, &path);
        assert!(matches!(result, Err(SegmentWriteError::EmptyBatch)));
        assert!(!path.exists());
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a.parquet");
        let b = temp_dir.path().join("b.parquet");
        let writer = ParquetSegmentWriter::new();

        let first = writer.write(&batch(2), &a).unwrap();
        let second = writer.write(&batch(3), &b).unwrap();
        assert_ne!(first.checksum, second.checksum);
    }

    #[test]
    fn test_read_missing_segment_fails() {
        assert!(read_segment(Path::new("/nonexistent/segment.parquet")).is_err());
    }
}
