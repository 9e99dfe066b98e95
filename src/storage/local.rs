//! Local filesystem object store.
//!
//! Objects are stored as flat files under `{root}/{bucket}/{key}`.
//! Every write goes to a temp file under `{root}/.tmp`, is fsynced, then
//! renamed into place, so a reader never sees a half-written object.

use futures::{stream, StreamExt, TryStreamExt};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::backend::{not_found, BodyStream, ObjectStore};

/// Stores objects on the local filesystem.
pub struct LocalObjectStore {
    /// Root directory for all buckets.
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a new `LocalObjectStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a bucket/key pair to a file path, rejecting anything that
    /// could escape the root.
    fn resolve(&self, bucket: &str, key: &str) -> std::io::Result<PathBuf> {
        for part in [bucket, key] {
            let path = Path::new(part);
            let escapes = part.is_empty()
                || path
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)));
            if escapes {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("invalid storage path: {bucket}/{key}"),
                ));
            }
        }
        Ok(self.root.join(bucket).join(key))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(format!("tmp-{}", uuid::Uuid::new_v4()))
    }

    /// Move a finished temp file into place, creating parent directories.
    async fn persist(tmp_path: &Path, final_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(tmp_path, final_path).await
    }

    async fn write_body(tmp_path: &Path, mut body: BodyStream) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp_path).await?;
        while let Some(chunk) = body.try_next().await? {
            file.write_all(&chunk).await?;
        }
        file.sync_all().await
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: BodyStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let final_path = self.resolve(bucket, key);
        Box::pin(async move {
            let final_path = final_path?;
            let tmp_path = self.temp_path();

            tracing::debug!("local put: {}", final_path.display());

            let written = match Self::write_body(&tmp_path, body).await {
                Ok(()) => Self::persist(&tmp_path, &final_path).await,
                Err(e) => Err(e),
            };
            if written.is_err() {
                let _ = tokio::fs::remove_file(&tmp_path).await;
            }
            Ok(written?)
        })
    }

    fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let src_path = self.resolve(bucket, src_key);
        let dst_path = self.resolve(bucket, dst_key);
        let missing = not_found(bucket, src_key);
        Box::pin(async move {
            let (src_path, dst_path) = (src_path?, dst_path?);
            let tmp_path = self.temp_path();

            tracing::debug!(
                "local copy: {} -> {}",
                src_path.display(),
                dst_path.display()
            );

            if let Err(e) = tokio::fs::copy(&src_path, &tmp_path).await {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                if e.kind() == ErrorKind::NotFound {
                    return Err(missing.into());
                }
                return Err(e.into());
            }
            if let Err(e) = Self::persist(&tmp_path, &dst_path).await {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
            Ok(())
        })
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = self.resolve(bucket, key);
        Box::pin(async move {
            let path = path?;
            tracing::debug!("local delete: {}", path.display());

            // Idempotent: if the file doesn't exist, that's fine.
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn get(&self, bucket: &str, key: &str) -> BodyStream {
        let path = self.resolve(bucket, key);
        let missing = not_found(bucket, key);
        stream::once(async move {
            let path = path?;
            match tokio::fs::File::open(&path).await {
                Ok(file) => Ok(ReaderStream::new(file)),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(missing),
                Err(e) => Err(e),
            }
        })
        .try_flatten()
        .boxed()
    }
}
