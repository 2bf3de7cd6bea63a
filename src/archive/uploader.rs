//! Object-store upload client with timeout and local-disk fallback

use crate::config::ArchiveConfig;
use crate::error::{AuditError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Destination for compressed archive batches
///
/// Kept as a trait so tests exercise the sink and upload paths without
/// a live object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, key: &str, payload: Bytes) -> Result<()>;
}

/// S3-backed object store
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    /// Build an S3 client from the archive configuration
    pub async fn connect(cfg: &ArchiveConfig) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()))
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(cfg.use_path_style)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: cfg.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, key: &str, payload: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(aws_sdk_s3::primitives::ByteStream::from(payload))
            .send()
            .await
            .map_err(|err| AuditError::Upload {
                key: key.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}

/// In-memory object store for testing
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: std::sync::Mutex<Vec<(String, Bytes)>>,
}

impl MemoryObjectStore {
    /// Snapshot of every stored `(key, payload)` pair, in PUT order
    pub fn objects(&self) -> Vec<(String, Bytes)> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, key: &str, payload: Bytes) -> Result<()> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((key.to_string(), payload));
        Ok(())
    }
}

/// Uploads archive batches with a per-call deadline, falling back to
/// local disk when the store is unreachable
pub struct UploadClient {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
    fallback_dir: Option<PathBuf>,
}

impl UploadClient {
    pub fn new(store: Arc<dyn ObjectStore>, cfg: &ArchiveConfig) -> Self {
        Self {
            store,
            timeout: cfg.upload_timeout(),
            fallback_dir: cfg.fallback_dir.as_ref().map(PathBuf::from),
        }
    }

    /// PUT the payload under the given key
    ///
    /// On failure the payload is preserved in the fallback directory
    /// when one is configured, and the original upload error is returned
    /// either way.
    pub async fn upload(&self, payload: Bytes, key: &str) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.store.put_object(key, payload.clone())).await
        {
            Ok(Ok(())) => {
                metrics::counter!(
                    "archive_uploads_total",
                    "destination" => "s3",
                    "status" => "success"
                )
                .increment(1);
                Ok(())
            }
            Ok(Err(err)) => {
                tracing::error!(key = %key, error = %err, "object-store upload failed");
                metrics::counter!(
                    "archive_uploads_total",
                    "destination" => "s3",
                    "status" => "failure"
                )
                .increment(1);
                self.write_fallback(&payload, key).await;
                Err(err)
            }
            Err(_) => {
                tracing::error!(key = %key, "object-store upload timed out");
                metrics::counter!(
                    "archive_uploads_total",
                    "destination" => "s3",
                    "status" => "timeout"
                )
                .increment(1);
                self.write_fallback(&payload, key).await;
                Err(AuditError::UploadTimeout {
                    key: key.to_string(),
                })
            }
        }
    }

    async fn write_fallback(&self, payload: &Bytes, key: &str) {
        let Some(dir) = &self.fallback_dir else {
            return;
        };

        let path = dir.join(key.replace('/', "_"));
        match tokio::fs::write(&path, payload).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "wrote fallback archive file");
                metrics::counter!(
                    "archive_uploads_total",
                    "destination" => "local",
                    "status" => "success"
                )
                .increment(1);
            }
            Err(err) => {
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "failed to write fallback archive file"
                );
                metrics::counter!(
                    "archive_uploads_total",
                    "destination" => "local",
                    "status" => "failure"
                )
                .increment(1);
            }
        }
    }
}
