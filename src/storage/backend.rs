//! Abstract object store trait.
//!
//! The sink depends on exactly four store operations.  Bodies travel as
//! boxed streams of [`Bytes`] so uploads never need to be fully buffered
//! and downloads surface failures as stream items.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;

/// A stream of object bytes.  An `Err` item terminates the body abnormally.
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Async object store contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Upload `body` to `key` in `bucket`.
    ///
    /// Must drain `body` to its end before reporting success, and must fail
    /// if `body` yields an error.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: BodyStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Copy the current bytes of `src_key` to `dst_key` within `bucket`.
    fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Delete `key` from `bucket`.  Deleting a missing key is not an error.
    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>>;

    /// Open `key` in `bucket` for reading.
    ///
    /// No request is made until the stream is first polled; a missing
    /// object shows up as an [`std::io::ErrorKind::NotFound`] item.
    fn get(&self, bucket: &str, key: &str) -> BodyStream;
}

/// Build the error item used for a missing object.
pub fn not_found(bucket: &str, key: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("Object not found: {bucket}/{key}"),
    )
}
