//! Streaming upload sink
//!
//! Payloads that fit in a single part go up with one `PutObject`. Anything
//! larger becomes a multipart upload that is only completed on commit; an
//! aborted or dropped sink cancels the upload so no partial object appears.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream as SdkBody;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use stow_core::{ChunkSink, Result};
use tracing::{debug, warn};

use crate::error::classify;

/// Upload requests the sink issues against one bucket
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait UploadApi: Send + Sync {
    async fn put_object(&self, key: &str, content_type: &str, body: Bytes) -> Result<()>;

    /// Returns the upload id
    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String>;

    /// Returns the part's ETag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<Option<String>>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;
}

/// [`UploadApi`] backed by the SDK client
pub(crate) struct SdkUploads {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl SdkUploads {
    pub(crate) fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl UploadApi for SdkUploads {
    async fn put_object(&self, key: &str, content_type: &str, body: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(body.len() as i64)
            .body(SdkBody::from(body))
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(response.upload_id().unwrap_or_default().to_string())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<Option<String>> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(SdkBody::from(body))
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(response.e_tag().map(str::to_string))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| classify(e, key))?;
        Ok(())
    }
}

pub(crate) struct MultipartSink {
    api: Arc<dyn UploadApi>,
    key: String,
    content_type: String,
    /// Held back so the final (possibly short) chunk is known at commit
    pending: Option<Bytes>,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    finished: bool,
}

impl MultipartSink {
    pub(crate) fn new(
        api: Arc<dyn UploadApi>,
        key: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            api,
            key: key.into(),
            content_type: content_type.into(),
            pending: None,
            upload_id: None,
            parts: Vec::new(),
            finished: false,
        }
    }

    async fn ensure_upload(&mut self) -> Result<String> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let id = self
            .api
            .create_multipart_upload(&self.key, &self.content_type)
            .await?;
        debug!(key = %self.key, upload_id = %id, "started multipart upload");
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, data: Bytes) -> Result<()> {
        let upload_id = self.ensure_upload().await?;
        let part_number = self.parts.len() as i32 + 1;
        let size = data.len();

        let e_tag = self
            .api
            .upload_part(&self.key, &upload_id, part_number, data)
            .await?;

        debug!(key = %self.key, part_number, size, "uploaded part");
        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(e_tag)
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for MultipartSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        match self.pending.replace(chunk) {
            Some(previous) => self.upload_part(previous).await,
            None => Ok(()),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        let last = self.pending.take();

        let Some(upload_id) = self.upload_id.clone() else {
            let body = last.unwrap_or_default();
            self.api
                .put_object(&self.key, &self.content_type, body)
                .await?;
            self.finished = true;
            return Ok(());
        };

        if let Some(last) = last {
            self.upload_part(last).await?;
        }
        let parts = std::mem::take(&mut self.parts);
        let count = parts.len();
        self.api
            .complete_multipart_upload(&self.key, &upload_id, parts)
            .await?;

        self.finished = true;
        debug!(key = %self.key, parts = count, "completed multipart upload");
        Ok(())
    }

    async fn abort(&mut self) {
        self.pending = None;
        if self.finished {
            return;
        }
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        match self.api.abort_multipart_upload(&self.key, &upload_id).await {
            Ok(()) => debug!(key = %self.key, "aborted multipart upload"),
            Err(e) => warn!(
                key = %self.key,
                upload_id = %upload_id,
                error = %e,
                "failed to abort multipart upload"
            ),
        }
    }
}

impl Drop for MultipartSink {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, upload_id = %upload_id, "multipart upload left open");
            return;
        };

        let api = Arc::clone(&self.api);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = api.abort_multipart_upload(&key, &upload_id).await {
                warn!(key = %key, error = %e, "failed to abort abandoned multipart upload");
            }
        });
    }
}
