//! Segment identity and batch types

use crate::feed::Record;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifies one segment: a partition date plus a per-partition sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId {
    pub partition: NaiveDate,
    pub sequence: u64,
}

impl SegmentId {
    pub fn new(partition: NaiveDate, sequence: u64) -> Self {
        Self {
            partition,
            sequence,
        }
    }

    /// Partition directory name, e.g. `dt=2024-01-01`
    pub fn partition_dir_name(&self) -> String {
        format!("dt={}", self.partition.format("%Y-%m-%d"))
    }

    /// Final file name, e.g. `segment-000003.parquet`
    pub fn file_name(&self) -> String {
        format!("segment-{:06}.parquet", self.sequence)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:06}", self.partition.format("%Y-%m-%d"), self.sequence)
    }
}

/// Records destined for one segment; never spans a partition boundary
#[derive(Debug, Clone)]
pub struct Batch {
    pub partition: NaiveDate,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// What the segment writer reports after a durable write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub row_count: u64,
    pub byte_size: u64,
    /// Hex SHA-256 of the file contents
    pub checksum: String,
}

/// A committed, immutable segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: SegmentId,
    /// Absolute path of the final file
    pub path: PathBuf,
    pub row_count: u64,
    pub byte_size: u64,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_naming() {
        let id = SegmentId::new(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), 42);
        assert_eq!(id.partition_dir_name(), "dt=2024-01-05");
        assert_eq!(id.file_name(), "segment-000042.parquet");
        assert_eq!(id.to_string(), "2024-01-05/000042");
    }

    #[test]
    fn test_segment_id_orders_by_partition_then_sequence() {
        let day1 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let mut ids = vec![
            SegmentId::new(day2, 1),
            SegmentId::new(day1, 2),
            SegmentId::new(day1, 1),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                SegmentId::new(day1, 1),
                SegmentId::new(day1, 2),
                SegmentId::new(day2, 1)
            ]
        );
    }
}
