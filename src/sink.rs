//! Content-addressed write and read paths.
//!
//! A write streams its body to a temporary key while hashing it, then
//! copies the temporary object to `{Y}/{M}/{D}/{sha1}.{ext}` and deletes
//! the temporary object.  The phases run strictly in order and the first
//! failure ends the write; nothing is retried and the temporary object is
//! never cleaned up on error.
//!
//! Reads hand back the store's stream for a key without any verification.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::io::StreamReader;
use tokio_util::sync::PollSender;
use tracing::debug;

use crate::config::SinkConfig;
use crate::digest::HashingStream;
use crate::errors::SinkError;
use crate::keys;
use crate::storage::backend::{BodyStream, ObjectStore};

/// Chunks queued between a [`ContentWriter`] and its upload.
const WRITE_QUEUE_DEPTH: usize = 1;

/// Content-addressed sink over an [`ObjectStore`].
#[derive(Clone)]
pub struct Sink {
    config: Arc<SinkConfig>,
    store: Arc<dyn ObjectStore>,
}

impl Sink {
    /// Create a sink writing to `config.bucket()` through `store`.
    pub fn new(config: SinkConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    /// The configuration this sink was built with.
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Start a write whose final key ends in `.{extension}`.
    ///
    /// Bytes written to the returned [`ContentWriter`] are uploaded as they
    /// arrive.  Call [`tokio::io::AsyncWriteExt::shutdown`] on the writer to
    /// mark the end of the content, then await the [`WriteCompletion`] for
    /// the final key.  Dropping the writer without shutting it down fails
    /// the write.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn writer(&self, extension: &str) -> (ContentWriter, WriteCompletion) {
        let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let finished = Arc::new(AtomicBool::new(false));
        let body = writer_body(rx, Arc::clone(&finished));

        let handle = tokio::spawn(store_content(
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            extension.to_string(),
            body,
        ));

        let writer = ContentWriter {
            sender: PollSender::new(tx),
            finished,
        };
        (writer, WriteCompletion { handle })
    }

    /// Store `body` and return its content-addressed key.
    ///
    /// Runs the whole protocol on the calling task.
    pub async fn write_stream(
        &self,
        extension: &str,
        body: BodyStream,
    ) -> Result<String, SinkError> {
        store_content(
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            extension.to_string(),
            body,
        )
        .await
    }

    /// Open `key` for reading.
    ///
    /// No request is made up front: a missing object surfaces as an error
    /// item on the returned stream.
    pub fn reader(&self, key: &str) -> ContentReader {
        ContentReader {
            inner: self.store.get(self.config.bucket(), key),
            bytes_read: 0,
            drained_tx: None,
        }
    }
}

/// Upload `body` under a temporary key, then relocate it to its
/// content-addressed key.
async fn store_content(
    store: Arc<dyn ObjectStore>,
    config: Arc<SinkConfig>,
    extension: String,
    body: BodyStream,
) -> Result<String, SinkError> {
    let bucket = config.bucket();
    let temp_key = keys::temporary_key(config.temp_namespace(), &extension);
    let (hashing, digest) = HashingStream::new(body);

    debug!("uploading {}/{}", bucket, temp_key);
    let uploaded = store.put(bucket, &temp_key, hashing.boxed()).await;
    if let Err(source) = uploaded {
        return Err(SinkError::Upload { temp_key, source });
    }

    // The store acknowledged the upload, so the body must have been drained.
    let digest = match digest.finalize() {
        Ok(digest) => digest,
        Err(source) => return Err(SinkError::Upload { temp_key, source }),
    };
    let final_key = keys::final_key(keys::local_today(), &digest, &extension);

    debug!("relocating {} -> {}", temp_key, final_key);
    let copied = store.copy(bucket, &temp_key, &final_key).await;
    if let Err(source) = copied {
        return Err(SinkError::Copy {
            temp_key,
            final_key,
            source,
        });
    }

    let deleted = store.delete(bucket, &temp_key).await;
    if let Err(source) = deleted {
        return Err(SinkError::Cleanup {
            temp_key,
            final_key,
            source,
        });
    }

    Ok(final_key)
}

/// Turn the writer's channel into an upload body.
///
/// A closed channel ends the body cleanly only if the writer was shut
/// down; a dropped writer ends it with an error so the upload fails.
fn writer_body(mut rx: mpsc::Receiver<Bytes>, finished: Arc<AtomicBool>) -> BodyStream {
    let mut done = false;
    futures::stream::poll_fn(move |cx| {
        if done {
            return Poll::Ready(None);
        }
        match ready!(rx.poll_recv(cx)) {
            Some(chunk) => Poll::Ready(Some(Ok(chunk))),
            None => {
                done = true;
                if finished.load(Ordering::Acquire) {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "writer dropped before shutdown",
                    ))))
                }
            }
        }
    })
    .boxed()
}

/// Write half of a content-addressed write.
///
/// Every successful `poll_write` hands the bytes to the upload; there is
/// no buffering beyond a single queued chunk.
pub struct ContentWriter {
    sender: PollSender<Bytes>,
    finished: Arc<AtomicBool>,
}

fn upload_closed() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "upload stopped accepting data; await the write completion for the cause",
    )
}

impl AsyncWrite for ContentWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.finished.load(Ordering::Acquire) {
            return Poll::Ready(Err(upload_closed()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(this.sender.poll_reserve(cx)).map_err(|_| upload_closed())?;
        this.sender
            .send_item(Bytes::copy_from_slice(buf))
            .map_err(|_| upload_closed())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        // The flag must be visible before the channel reports closed.
        this.finished.store(true, Ordering::Release);
        this.sender.close();
        Poll::Ready(Ok(()))
    }
}

/// Resolves exactly once with the outcome of a write started by
/// [`Sink::writer`].
///
/// Dropping it does not stop the write.
#[derive(Debug)]
pub struct WriteCompletion {
    handle: JoinHandle<Result<String, SinkError>>,
}

impl Future for WriteCompletion {
    type Output = Result<String, SinkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.handle).poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Poll::Ready(Err(SinkError::Interrupted(err.to_string()))),
        }
    }
}

/// Byte stream of a stored object.
pub struct ContentReader {
    inner: BodyStream,
    bytes_read: u64,
    drained_tx: Option<oneshot::Sender<u64>>,
}

impl ContentReader {
    /// Resolves with the total number of bytes once the stream has been
    /// read to its end.  Never resolves successfully if the stream fails
    /// or is dropped early.
    pub fn on_drained(&mut self) -> oneshot::Receiver<u64> {
        let (tx, rx) = oneshot::channel();
        self.drained_tx = Some(tx);
        rx
    }

    /// Adapt into a [`tokio::io::AsyncRead`].
    pub fn into_async_read(self) -> StreamReader<Self, Bytes> {
        StreamReader::new(self)
    }

    /// Read the whole object into memory.
    pub async fn read_to_end(self) -> std::io::Result<Bytes> {
        let data = self
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(data.freeze())
    }
}

impl Stream for ContentReader {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let item = ready!(self.inner.poll_next_unpin(cx));
        match &item {
            Some(Ok(chunk)) => self.bytes_read += chunk.len() as u64,
            Some(Err(_)) => {
                self.drained_tx.take();
            }
            None => {
                if let Some(tx) = self.drained_tx.take() {
                    let _ = tx.send(self.bytes_read);
                }
            }
        }
        Poll::Ready(item)
    }
}
