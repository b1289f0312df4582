use std::collections::HashMap;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use lapse_blob::{BlobError, SaveOptions};
use tracing::{debug, warn};

use crate::error::{S3Error, sdk_failure};

/// Buffers a streamed payload into parts and drives one upload.
///
/// The multipart upload is created lazily when the first full part is
/// ready. If the stream ends before that, [`finish`](Self::finish) issues a
/// single `PutObject` instead.
pub(crate) struct PartUploader<'a> {
    client: &'a aws_sdk_s3::Client,
    bucket: &'a str,
    key: &'a str,
    content_type: Option<String>,
    metadata: Option<HashMap<String, String>>,
    part_size: usize,
    buffer: BytesMut,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl<'a> PartUploader<'a> {
    pub(crate) fn new(
        client: &'a aws_sdk_s3::Client,
        bucket: &'a str,
        key: &'a str,
        options: &SaveOptions,
        part_size: usize,
    ) -> Self {
        let metadata = (!options.metadata.is_empty()).then(|| {
            options
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });
        Self {
            client,
            bucket,
            key,
            content_type: options.content_type.clone(),
            metadata,
            part_size,
            buffer: BytesMut::with_capacity(part_size),
            upload_id: None,
            parts: Vec::new(),
        }
    }

    /// Append a chunk, uploading every part that fills up.
    pub(crate) async fn push(&mut self, chunk: &[u8]) -> Result<(), BlobError> {
        self.buffer.extend_from_slice(chunk);
        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    /// Flush the tail and make the object visible.
    ///
    /// On error the caller must still [`abort`](Self::abort).
    pub(crate) async fn finish(&mut self) -> Result<(), BlobError> {
        let Some(upload_id) = self.upload_id.clone() else {
            let body = std::mem::take(&mut self.buffer).freeze();
            self.client
                .put_object()
                .bucket(self.bucket)
                .key(self.key)
                .set_content_type(self.content_type.clone())
                .set_metadata(self.metadata.clone())
                .body(ByteStream::from(body))
                .send()
                .await
                .map_err(|e| sdk_failure("PutObject", &e))?;
            return Ok(());
        };

        if !self.buffer.is_empty() {
            let tail = std::mem::take(&mut self.buffer).freeze();
            self.upload_part(tail).await?;
        }

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| sdk_failure("CompleteMultipartUpload", &e))?;
        self.upload_id = None;
        Ok(())
    }

    /// Discard any parts uploaded so far.
    pub(crate) async fn abort(&self) {
        let Some(upload_id) = &self.upload_id else {
            return;
        };
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(upload_id)
            .send()
            .await;
        match result {
            Ok(_) => debug!(key = %self.key, "multipart upload aborted"),
            Err(e) => warn!(
                key = %self.key,
                upload_id = %upload_id,
                error = %aws_sdk_s3::error::DisplayErrorContext(&e),
                "failed to abort multipart upload; bucket lifecycle rules must reclaim it"
            ),
        }
    }

    async fn upload_id(&mut self) -> Result<String, BlobError> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let created = self
            .client
            .create_multipart_upload()
            .bucket(self.bucket)
            .key(self.key)
            .set_content_type(self.content_type.clone())
            .set_metadata(self.metadata.clone())
            .send()
            .await
            .map_err(|e| sdk_failure("CreateMultipartUpload", &e))?;
        let id = created
            .upload_id()
            .ok_or_else(|| S3Error::MalformedResponse("missing upload id".to_owned()))?
            .to_owned();
        debug!(key = %self.key, upload_id = %id, "multipart upload started");
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, part: Bytes) -> Result<(), BlobError> {
        let upload_id = self.upload_id().await?;
        let part_number = i32::try_from(self.parts.len() + 1)
            .map_err(|_| S3Error::Service("too many parts".to_owned()))?;
        let uploaded = self
            .client
            .upload_part()
            .bucket(self.bucket)
            .key(self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(part))
            .send()
            .await
            .map_err(|e| sdk_failure("UploadPart", &e))?;
        self.parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(uploaded.e_tag().map(str::to_owned))
                .build(),
        );
        Ok(())
    }
}
