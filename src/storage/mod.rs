//! Object store backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over where bytes
//! physically live.  Implementations include an S3-compatible client,
//! an in-memory map and a local directory tree.

pub mod backend;
pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;
use tracing::info;

use crate::config::{SinkConfig, StoreBackend, StoreConfig};
use backend::ObjectStore;

/// Build the store selected by `store.backend`.
pub async fn open_store(
    sink: &SinkConfig,
    store: &StoreConfig,
) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let backend: Arc<dyn ObjectStore> = match store.backend {
        StoreBackend::S3 => Arc::new(s3::S3ObjectStore::new(sink, store).await?),
        StoreBackend::Memory => {
            info!("Memory object store initialized");
            Arc::new(memory::MemoryObjectStore::new())
        }
        StoreBackend::Local => {
            let local = local::LocalObjectStore::new(&store.local_root)?;
            info!("Local object store initialized at {}", store.local_root);
            Arc::new(local)
        }
    };
    Ok(backend)
}
