//! Remote sinks

use super::SinkError;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Destination for committed segment files
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Upload `local_path` under `remote_key`, returning the remote URI.
    ///
    /// Putting the same key twice must overwrite, never duplicate.
    async fn put(&self, local_path: &Path, remote_key: &str) -> Result<String, SinkError>;
}

/// `object_store` backed sink (S3 or a local directory)
#[derive(Debug, Clone)]
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    uri_base: String,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>, uri_base: impl Into<String>) -> Self {
        Self {
            store,
            uri_base: uri_base.into(),
        }
    }

    /// S3 bucket; credentials come from the standard AWS environment variables
    pub fn s3(bucket: &str, region: Option<&str>) -> object_store::Result<Self> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        let store = builder.build()?;
        Ok(Self::new(Arc::new(store), format!("s3://{}", bucket)))
    }

    /// Directory on the local filesystem, created if missing
    pub fn local(dir: impl AsRef<Path>) -> object_store::Result<Self> {
        let generic = |e: io::Error| object_store::Error::Generic {
            store: "LocalFileSystem",
            source: Box::new(e),
        };
        std::fs::create_dir_all(dir.as_ref()).map_err(generic)?;
        let canonical = std::fs::canonicalize(dir.as_ref()).map_err(generic)?;

        let store = LocalFileSystem::new_with_prefix(&canonical)?;
        Ok(Self::new(
            Arc::new(store),
            format!("file://{}", canonical.display()),
        ))
    }

    pub fn uri_base(&self) -> &str {
        &self.uri_base
    }
}

fn classify(err: object_store::Error) -> SinkError {
    match &err {
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. }
        | object_store::Error::NotImplemented
        | object_store::Error::InvalidPath { .. } => SinkError::Permanent(err.to_string()),
        _ => SinkError::Transient(err.to_string()),
    }
}

#[async_trait]
impl RemoteSink for ObjectStoreSink {
    async fn put(&self, local_path: &Path, remote_key: &str) -> Result<String, SinkError> {
        let data = tokio::fs::read(local_path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                SinkError::Permanent(format!("{}: {}", local_path.display(), e))
            }
            _ => SinkError::Transient(format!("{}: {}", local_path.display(), e)),
        })?;

        let location =
            ObjectPath::parse(remote_key).map_err(|e| SinkError::Permanent(e.to_string()))?;

        self.store
            .put(&location, PutPayload::from_bytes(Bytes::from(data)))
            .await
            .map_err(classify)?;

        Ok(format!("{}/{}", self.uri_base, remote_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_put_overwrites_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let remote = temp_dir.path().join("remote");
        let sink = ObjectStoreSink::local(&remote).unwrap();

        let local = temp_dir.path().join("segment-000001.parquet");
        std::fs::write(&local, b"first").unwrap();
        let key = "msa-poc/dt=2024-01-01/segment-000001.parquet";

        let uri = sink.put(&local, key).await.unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with(key));

        std::fs::write(&local, b"second").unwrap();
        sink.put(&local, key).await.unwrap();

        let dir = remote.join("msa-poc").join("dt=2024-01-01");
        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(dir.join("segment-000001.parquet")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_missing_local_file_is_permanent() {
        let temp_dir = TempDir::new().unwrap();
        let sink = ObjectStoreSink::local(temp_dir.path().join("remote")).unwrap();

        let result = sink.put(&temp_dir.path().join("absent.parquet"), "k/absent.parquet").await;
        assert!(matches!(result, Err(SinkError::Permanent(_))));
    }

    #[test]
    fn test_classify_errors() {
        let denied = object_store::Error::PermissionDenied {
            path: "k".into(),
            source: "denied".into(),
        };
        assert!(matches!(classify(denied), SinkError::Permanent(_)));

        let generic = object_store::Error::Generic {
            store: "S3",
            source: "connection reset".into(),
        };
        assert!(matches!(classify(generic), SinkError::Transient(_)));
    }
}
