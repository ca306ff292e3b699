//! Local segment storage
//!
//! Storage layout, segment identity and the Parquet segment writer

mod layout;
mod parquet;
mod segment;

pub use self::parquet::{
    checksum_file, read_segment, segment_schema, ParquetSegmentWriter, SegmentWriteError,
    SegmentWriter,
};
pub use layout::{is_temp_file, parse_segment_path, remote_key, StorageLayout};
pub use segment::{Batch, Segment, SegmentId, WrittenFile};
