//! In-memory object store.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>` keyed by
//! `"{bucket}/{key}"`.  Nothing is persisted.

use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::backend::{not_found, BodyStream, ObjectStore};

/// In-memory object store.
#[derive(Default, Clone)]
pub struct MemoryObjectStore {
    /// storage path -> object bytes.
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn path(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    /// Current bytes at `key`, if any.
    pub async fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .await
            .get(&Self::path(bucket, key))
            .cloned()
    }

    /// Sorted keys stored in `bucket`.
    pub async fn keys(&self, bucket: &str) -> Vec<String> {
        let prefix = format!("{bucket}/");
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: BodyStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = Self::path(bucket, key);
        Box::pin(async move {
            // Collect first so a failed body never becomes visible.
            let data = body
                .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                    acc.extend_from_slice(&chunk);
                    Ok(acc)
                })
                .await?
                .freeze();

            tracing::debug!("memory put: {} ({} bytes)", path, data.len());
            self.objects.write().await.insert(path, data);
            Ok(())
        })
    }

    fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let src_key = src_key.to_string();
        let dst_key = dst_key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            let data = objects
                .get(&Self::path(&bucket, &src_key))
                .cloned()
                .ok_or_else(|| not_found(&bucket, &src_key))?;

            tracing::debug!("memory copy: {}/{} -> {}", bucket, src_key, dst_key);
            objects.insert(Self::path(&bucket, &dst_key), data);
            Ok(())
        })
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let path = Self::path(bucket, key);
        Box::pin(async move {
            tracing::debug!("memory delete: {}", path);
            self.objects.write().await.remove(&path);
            Ok(())
        })
    }

    fn get(&self, bucket: &str, key: &str) -> BodyStream {
        let objects = Arc::clone(&self.objects);
        let bucket = bucket.to_string();
        let key = key.to_string();
        stream::once(async move {
            objects
                .read()
                .await
                .get(&Self::path(&bucket, &key))
                .cloned()
                .ok_or_else(|| not_found(&bucket, &key))
        })
        .boxed()
    }
}
