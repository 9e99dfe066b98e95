//! Incremental SHA-1 over a byte stream in transit.
//!
//! [`HashingStream`] wraps a body stream, folds every chunk into a SHA-1
//! state and yields the chunk unchanged. The digest is handed to the paired
//! [`DigestHandle`] only once the inner stream reports a clean end, so a
//! caller cannot observe a digest of partial input.

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use sha1::{Digest, Sha1};
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::oneshot;

/// SHA-1 digest of an object's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 20]);

impl ContentDigest {
    /// Hash `data` in one go.
    pub fn compute(data: &[u8]) -> Self {
        Self::from_hasher(Sha1::new_with_prefix(data))
    }

    fn from_hasher(hasher: Sha1) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase hex rendering, as used in final keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

pin_project! {
    /// A stream adapter that hashes every chunk passing through it.
    pub struct HashingStream<S> {
        #[pin]
        inner: S,
        hasher: Sha1,
        digest_tx: Option<oneshot::Sender<ContentDigest>>,
    }
}

/// Receiving side of a [`HashingStream`].
#[derive(Debug)]
pub struct DigestHandle {
    digest_rx: oneshot::Receiver<ContentDigest>,
}

impl<S> HashingStream<S> {
    /// Wrap `inner`, returning the adapter and the handle that will receive
    /// the digest once `inner` is exhausted.
    pub fn new(inner: S) -> (Self, DigestHandle) {
        let (digest_tx, digest_rx) = oneshot::channel();
        let stream = Self {
            inner,
            hasher: Sha1::new(),
            digest_tx: Some(digest_tx),
        };
        (stream, DigestHandle { digest_rx })
    }
}

impl<S> Stream for HashingStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));
        match &item {
            Some(Ok(chunk)) => this.hasher.update(chunk),
            // A failed body never produces a digest.
            Some(Err(_)) => {
                this.digest_tx.take();
            }
            None => {
                if let Some(tx) = this.digest_tx.take() {
                    let hasher = std::mem::take(this.hasher);
                    let _ = tx.send(ContentDigest::from_hasher(hasher));
                }
            }
        }
        Poll::Ready(item)
    }
}

impl DigestHandle {
    /// Take the digest of everything the stream yielded.
    ///
    /// Fails if the stream has not reached a clean end, which means the
    /// consumer stopped early or the body errored.
    pub fn finalize(mut self) -> anyhow::Result<ContentDigest> {
        self.digest_rx
            .try_recv()
            .map_err(|_| anyhow::anyhow!("body was not fully consumed; digest is unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt, TryStreamExt};

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = std::io::Result<Bytes>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(*p)))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_known_digests() {
        assert_eq!(
            ContentDigest::compute(b"hello").to_hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
        assert_eq!(
            ContentDigest::compute(b"").to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[tokio::test]
    async fn test_chunks_pass_through_unchanged() {
        let (hashing, digest) = HashingStream::new(chunks(&[&b"he"[..], &b""[..], &b"llo"[..]]));
        let seen: Vec<Bytes> = hashing.try_collect().await.unwrap();
        assert_eq!(
            seen,
            vec![
                Bytes::from_static(b"he"),
                Bytes::new(),
                Bytes::from_static(b"llo")
            ]
        );
        assert_eq!(
            digest.finalize().unwrap().to_hex(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[tokio::test]
    async fn test_digest_independent_of_chunking() {
        let data: &'static [u8] = b"the quick brown fox jumps over the lazy dog";
        let expected = ContentDigest::compute(data);

        for size in [1, 3, 7, 16, data.len()] {
            let parts: Vec<std::io::Result<Bytes>> = data
                .chunks(size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let (hashing, digest) = HashingStream::new(stream::iter(parts));
            hashing.try_collect::<Vec<_>>().await.unwrap();
            assert_eq!(digest.finalize().unwrap(), expected, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn test_empty_stream_yields_empty_digest() {
        let (hashing, digest) = HashingStream::new(chunks(&[]));
        assert_eq!(hashing.count().await, 0);
        assert_eq!(
            digest.finalize().unwrap().to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[tokio::test]
    async fn test_digest_unavailable_before_end() {
        let (mut hashing, digest) = HashingStream::new(chunks(&[&b"a"[..], &b"b"[..]]));
        hashing.next().await.unwrap().unwrap();
        assert!(digest.finalize().is_err());
    }

    #[tokio::test]
    async fn test_error_poisons_digest() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "source went away",
            )),
        ]);
        let (hashing, digest) = HashingStream::new(body);
        let items: Vec<_> = hashing.collect().await;
        assert!(items[1].is_err());
        assert!(digest.finalize().is_err());
    }
}
