//! On-disk layout of a storage root
//!
//! ```text
//! <root>/
//!   ledger.jsonl
//!   segments/dt=2024-01-01/segment-000001.parquet
//!   segments/dt=2024-01-01/.segment-000002.parquet.tmp
//!   quarantine/
//! ```

use super::SegmentId;
use chrono::NaiveDate;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const LEDGER_FILE: &str = "ledger.jsonl";
const SEGMENTS_DIR: &str = "segments";
const QUARANTINE_DIR: &str = "quarantine";
const TEMP_SUFFIX: &str = ".tmp";

/// Paths under one pipeline's storage root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root, segment and quarantine directories
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(self.segments_dir())?;
        fs::create_dir_all(self.quarantine_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join(SEGMENTS_DIR)
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE_DIR)
    }

    pub fn partition_dir(&self, partition: NaiveDate) -> PathBuf {
        self.segments_dir()
            .join(SegmentId::new(partition, 0).partition_dir_name())
    }

    /// Path relative to the root, as stored in the ledger
    pub fn relative_path(&self, id: &SegmentId) -> PathBuf {
        Path::new(SEGMENTS_DIR)
            .join(id.partition_dir_name())
            .join(id.file_name())
    }

    pub fn final_path(&self, id: &SegmentId) -> PathBuf {
        self.root.join(self.relative_path(id))
    }

    /// Hidden sibling of the final path inside the same directory
    pub fn temp_path(&self, id: &SegmentId) -> PathBuf {
        self.partition_dir(id.partition)
            .join(format!(".{}{}", id.file_name(), TEMP_SUFFIX))
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Where a suspicious file is moved aside to
    pub fn quarantine_path(&self, file: &Path) -> PathBuf {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let partition = file
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.quarantine_dir().join(format!("{}_{}", partition, name))
    }

    /// Every file under the segments tree, temp files included
    pub fn list_segment_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let segments = self.segments_dir();
        if !segments.exists() {
            return Ok(files);
        }

        for partition in fs::read_dir(segments)? {
            let partition = partition?;
            if !partition.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(partition.path())? {
                let file = file?;
                if file.file_type()?.is_file() {
                    files.push(file.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Whether a path names an in-progress write
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX))
}

/// Recover the segment id from a final segment path
pub fn parse_segment_path(path: &Path) -> Option<SegmentId> {
    let file = path.file_name()?.to_str()?;
    let sequence = file
        .strip_prefix("segment-")?
        .strip_suffix(".parquet")?
        .parse()
        .ok()?;
    let dir = path.parent()?.file_name()?.to_str()?;
    let partition = NaiveDate::parse_from_str(dir.strip_prefix("dt=")?, "%Y-%m-%d").ok()?;
    Some(SegmentId::new(partition, sequence))
}

/// Deterministic object key: `{prefix}/dt={date}/segment-{seq}.parquet`
pub fn remote_key(prefix: &str, id: &SegmentId) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{}/{}", id.partition_dir_name(), id.file_name())
    } else {
        format!("{}/{}/{}", prefix, id.partition_dir_name(), id.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(seq: u64) -> SegmentId {
        SegmentId::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), seq)
    }

    #[test]
    fn test_paths() {
        let layout = StorageLayout::new("/data");
        assert_eq!(layout.ledger_path(), PathBuf::from("/data/ledger.jsonl"));
        assert_eq!(
            layout.final_path(&id(3)),
            PathBuf::from("/data/segments/dt=2024-01-01/segment-000003.parquet")
        );
        assert_eq!(
            layout.temp_path(&id(3)),
            PathBuf::from("/data/segments/dt=2024-01-01/.segment-000003.parquet.tmp")
        );
        assert_eq!(
            layout.relative_path(&id(3)),
            PathBuf::from("segments/dt=2024-01-01/segment-000003.parquet")
        );
    }

    #[test]
    fn test_temp_and_final_share_directory() {
        let layout = StorageLayout::new("/data");
        assert_eq!(
            layout.temp_path(&id(1)).parent(),
            layout.final_path(&id(1)).parent()
        );
        assert!(is_temp_file(&layout.temp_path(&id(1))));
        assert!(!is_temp_file(&layout.final_path(&id(1))));
    }

    #[test]
    fn test_parse_segment_path() {
        let layout = StorageLayout::new("/data");
        assert_eq!(parse_segment_path(&layout.final_path(&id(17))), Some(id(17)));
        assert_eq!(parse_segment_path(&layout.temp_path(&id(17))), None);
        assert_eq!(parse_segment_path(Path::new("/data/segments/misc/notes.txt")), None);
    }

    #[test]
    fn test_remote_key_is_deterministic() {
        assert_eq!(
            remote_key("msa-poc/", &id(2)),
            "msa-poc/dt=2024-01-01/segment-000002.parquet"
        );
        assert_eq!(remote_key("", &id(2)), "dt=2024-01-01/segment-000002.parquet");
        assert_eq!(remote_key("a/b", &id(2)), remote_key("a/b", &id(2)));
    }

    #[test]
    fn test_list_segment_files() {
        let temp_dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp_dir.path());
        layout.ensure().unwrap();
        assert!(layout.list_segment_files().unwrap().is_empty());

        fs::create_dir_all(layout.partition_dir(id(1).partition)).unwrap();
        fs::write(layout.final_path(&id(1)), b"x").unwrap();
        fs::write(layout.temp_path(&id(2)), b"y").unwrap();

        let files = layout.list_segment_files().unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_quarantine_path_keeps_partition() {
        let layout = StorageLayout::new("/data");
        assert_eq!(
            layout.quarantine_path(&layout.final_path(&id(4))),
            PathBuf::from("/data/quarantine/dt=2024-01-01_segment-000004.parquet")
        );
    }
}
