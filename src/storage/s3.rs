//! S3-compatible object store client.
//!
//! Talks to any S3-compatible endpoint with static credentials taken from
//! the sink configuration.  Bodies of unknown length are buffered up to
//! `part_size`: anything that fits goes out as a single `PutObject`,
//! larger bodies are sent as a multipart upload.
//!
//! Retries and timeouts are whatever the SDK client is configured with;
//! this module adds none of its own.

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, info, warn};

use super::backend::{not_found, BodyStream, ObjectStore};
use crate::config::{SinkConfig, StoreConfig};

/// Characters left unescaped in a `CopySource` key.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// S3 requires every part but the last to be at least 5 MiB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Object store backed by an S3-compatible service.
pub struct S3ObjectStore {
    /// AWS S3 SDK client.
    client: Client,
    /// Buffer size that triggers a multipart upload.
    part_size: usize,
}

impl S3ObjectStore {
    /// Build a client for `sink.endpoint()` using the sink's static
    /// credentials.
    pub async fn new(sink: &SinkConfig, store: &StoreConfig) -> anyhow::Result<Self> {
        let creds = aws_sdk_s3::config::Credentials::new(
            sink.key(),
            sink.secret(),
            None, // session_token
            None, // expiry
            "s3sink-config",
        );

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(store.region.clone()))
            .endpoint_url(sink.endpoint())
            .credentials_provider(creds);

        if let Some(attempts) = store.max_attempts {
            config_loader =
                config_loader.retry_config(RetryConfig::standard().with_max_attempts(attempts));
        }
        if let Some(timeout) = store.operation_timeout() {
            config_loader = config_loader.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(timeout)
                    .build(),
            );
        }

        let sdk_config = config_loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(store.use_path_style)
            .build();

        info!(
            "S3 store client initialized: endpoint={} region={} path_style={}",
            sink.endpoint(),
            store.region,
            store.use_path_style
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            part_size: store.part_size.max(MIN_PART_SIZE),
        })
    }

    /// Map an AWS SDK error to an anyhow error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> anyhow::Error {
        anyhow::anyhow!("S3 {context}: {err}")
    }

    /// `CopySource` header value for `key` in `bucket`.
    fn copy_source(bucket: &str, key: &str) -> String {
        format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE))
    }

    /// Read from `body` until `buffer` holds at least `part_size` bytes or
    /// the body ends.  Returns `false` once the body is exhausted.
    async fn fill(
        body: &mut BodyStream,
        buffer: &mut BytesMut,
        part_size: usize,
    ) -> anyhow::Result<bool> {
        while buffer.len() < part_size {
            match body.try_next().await? {
                Some(chunk) => buffer.extend_from_slice(&chunk),
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    async fn put_single(&self, bucket: &str, key: &str, data: Bytes) -> anyhow::Result<()> {
        debug!(
            "S3 put_object: bucket={} key={} ({} bytes)",
            bucket,
            key,
            data.len()
        );

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error("put_object", e))?;

        Ok(())
    }

    /// Upload `buffer` and the rest of `body` as a multipart upload,
    /// aborting the upload on any failure.
    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        buffer: BytesMut,
        body: BodyStream,
    ) -> anyhow::Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error("create_multipart_upload", e))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| anyhow::anyhow!("S3 did not return an upload ID"))?
            .to_string();

        debug!(
            "S3 multipart upload started: bucket={} key={} upload_id={}",
            bucket, key, upload_id
        );

        match self
            .upload_parts(bucket, key, &upload_id, buffer, body)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Aborting S3 multipart upload {} due to error: {}", upload_id, e);
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort S3 multipart upload: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut buffer: BytesMut,
        mut body: BodyStream,
    ) -> anyhow::Result<()> {
        let mut completed_parts = Vec::new();
        let mut part_number: i32 = 1;

        loop {
            let more = Self::fill(&mut body, &mut buffer, self.part_size).await?;
            if buffer.is_empty() && !more {
                break;
            }
            let part = buffer.split().freeze();

            debug!(
                "S3 upload_part: key={} upload_id={} part={} ({} bytes)",
                key,
                upload_id,
                part_number,
                part.len()
            );

            let resp = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("upload_part", e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(resp.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );
            part_number += 1;

            if !more {
                break;
            }
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error("complete_multipart_upload", e))?;

        Ok(())
    }
}

/// Adapt an SDK response body into a stream of chunks.
fn response_stream(body: ByteStream) -> impl Stream<Item = std::io::Result<Bytes>> {
    stream::try_unfold(body, |mut body| async move {
        match body.try_next().await {
            Ok(Some(chunk)) => Ok(Some((chunk, body))),
            Ok(None) => Ok(None),
            Err(e) => Err(std::io::Error::other(e)),
        }
    })
}

impl ObjectStore for S3ObjectStore {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        body: BodyStream,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let mut body = body;
            let mut buffer = BytesMut::new();
            let more = Self::fill(&mut body, &mut buffer, self.part_size).await?;

            if more {
                self.put_multipart(&bucket, &key, buffer, body).await
            } else {
                self.put_single(&bucket, &key, buffer.freeze()).await
            }
        })
    }

    fn copy(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let copy_source = Self::copy_source(&bucket, src_key);
        let dst_key = dst_key.to_string();
        Box::pin(async move {
            debug!("S3 copy_object: src={} dst={}/{}", copy_source, bucket, dst_key);

            self.client
                .copy_object()
                .bucket(&bucket)
                .key(&dst_key)
                .copy_source(&copy_source)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("copy_object", e.into_service_error()))?;

            Ok(())
        })
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            debug!("S3 delete_object: bucket={} key={}", bucket, key);

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;

            Ok(())
        })
    }

    fn get(&self, bucket: &str, key: &str) -> BodyStream {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        stream::once(async move {
            debug!("S3 get_object: bucket={} key={}", bucket, key);

            let resp = client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        not_found(&bucket, &key)
                    } else {
                        std::io::Error::other(Self::map_sdk_error("get_object", service_err))
                    }
                })?;

            Ok::<_, std::io::Error>(response_stream(resp.body))
        })
        .try_flatten()
        .boxed()
    }
}
