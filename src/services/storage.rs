use std::sync::Arc;

use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::UploadError;

/// Progress callback, fired with percentages in 0..=100 as a transfer
/// advances.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Context handed to a single-shot upload: progress reporting plus a
/// cancellation signal the transfer must honor promptly.
pub struct UploadContext {
    pub on_progress: ProgressFn,
    pub cancel: CancellationToken,
}

/// Object-store capability consumed by the scheduler. Retry/backoff and
/// authentication are the implementation's concern, not the scheduler's.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads a blob and returns its object key.
    async fn upload(&self, blob: Bytes, ctx: UploadContext) -> Result<String, UploadError>;

    /// Resolves an object key to a public URL.
    fn object_url(&self, key: &str) -> String;
}

/// Blobs above this size go through the multipart path, one part per chunk.
const PART_SIZE: usize = 10 * 1024 * 1024;

/// S3/MinIO-backed object store. Multipart parts double as progress ticks.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket,
            public_base_url,
        }
    }

    async fn put_single(
        &self,
        key: &str,
        blob: Bytes,
        ctx: &UploadContext,
    ) -> Result<(), UploadError> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(blob));

        tokio::select! {
            result = request.send() => {
                result.map_err(|e| UploadError::Upload(e.to_string()))?;
            }
            _ = ctx.cancel.cancelled() => {
                return Err(UploadError::Canceled);
            }
        }

        (ctx.on_progress)(100);
        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        blob: Bytes,
        ctx: &UploadContext,
    ) -> Result<(), UploadError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| UploadError::Upload(e.to_string()))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| UploadError::Upload("missing multipart upload id".to_string()))?
            .to_string();

        let total = blob.len();
        let mut completed_parts = Vec::new();
        let mut sent = 0usize;
        let mut part_number = 1i32;

        while sent < total {
            let end = (sent + PART_SIZE).min(total);
            let part_body = blob.slice(sent..end);

            let request = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .body(ByteStream::from(part_body))
                .part_number(part_number);

            let uploaded = tokio::select! {
                result = request.send() => {
                    match result {
                        Ok(part) => part,
                        Err(e) => {
                            self.abort_multipart(key, &upload_id).await;
                            return Err(UploadError::Upload(e.to_string()));
                        }
                    }
                }
                _ = ctx.cancel.cancelled() => {
                    self.abort_multipart(key, &upload_id).await;
                    return Err(UploadError::Canceled);
                }
            };

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(uploaded.e_tag().unwrap_or_default())
                    .part_number(part_number)
                    .build(),
            );

            sent = end;
            part_number += 1;
            (ctx.on_progress)(((sent as f64 / total as f64) * 100.0).round() as u8);
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| UploadError::Upload(e.to_string()))?;

        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!("Failed to abort multipart upload for {}: {}", key, e);
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3ObjectStore {
    async fn upload(&self, blob: Bytes, ctx: UploadContext) -> Result<String, UploadError> {
        let key = format!("media/{}", Uuid::new_v4());
        tracing::info!("⬆️  Starting S3 upload of {} bytes to {}", blob.len(), key);

        if blob.len() <= PART_SIZE {
            self.put_single(&key, blob, &ctx).await?;
        } else {
            self.put_multipart(&key, blob, &ctx).await?;
        }

        Ok(key)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
    }
}
