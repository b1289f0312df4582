use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lapse_blob::{
    BlobError, BlobStream, ByteRange, ByteStore, KeyStream, ObjectMeta, SaveOptions, SavedObject,
    interruptible,
};

use crate::auth::build_client;
use crate::config::S3BlobConfig;
use crate::error::sdk_failure;
use crate::upload::PartUploader;

/// Byte store backed by an S3 bucket.
pub struct S3ByteStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    part_size: usize,
}

impl std::fmt::Debug for S3ByteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ByteStore")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("part_size", &self.part_size)
            .field("client", &"<S3Client>")
            .finish()
    }
}

impl S3ByteStore {
    /// Create a store by building an AWS SDK client from `config`.
    pub async fn new(config: &S3BlobConfig) -> Self {
        let client = build_client(config).await;
        info!(bucket = %config.bucket, "S3 byte store configured");
        Self::with_client(config, client)
    }

    /// Create a store with a pre-built client.
    pub fn with_client(config: &S3BlobConfig, client: aws_sdk_s3::Client) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone().unwrap_or_default(),
            part_size: config.effective_part_size(),
        }
    }

    fn object_key(&self, key: &str) -> Result<String, BlobError> {
        if key.is_empty() || key.starts_with('/') {
            return Err(BlobError::InvalidKey(key.to_owned()));
        }
        Ok(format!("{}{key}", self.prefix))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, BlobError> {
        let object_key = self.object_key(key)?;
        let head = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(head) => head,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => {
                return Ok(None);
            }
            Err(e) => return Err(sdk_failure("HeadObject", &e)),
        };

        Ok(Some(ObjectMeta {
            key: key.to_owned(),
            size: head
                .content_length()
                .and_then(|len| u64::try_from(len).ok())
                .unwrap_or(0),
            content_type: head.content_type().map(str::to_owned),
            last_modified: head.last_modified().and_then(|t| {
                DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())
            }),
            metadata: head
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl ByteStore for S3ByteStore {
    #[instrument(skip(self, data, options, cancel), fields(bucket = %self.bucket, key = %key))]
    async fn save(
        &self,
        key: &str,
        mut data: BlobStream,
        options: &SaveOptions,
        cancel: &CancellationToken,
    ) -> Result<SavedObject, BlobError> {
        let object_key = self.object_key(key)?;
        let mut uploader =
            PartUploader::new(&self.client, &self.bucket, &object_key, options, self.part_size);

        let mut size = 0u64;
        let streamed: Result<(), BlobError> = async {
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(BlobError::Cancelled),
                    next = data.next() => next,
                };
                let Some(chunk) = next else {
                    break;
                };
                let chunk = chunk.map_err(|e| BlobError::Source(e.to_string()))?;
                size += chunk.len() as u64;
                if let Some(limit) = options.limit
                    && size > limit
                {
                    return Err(BlobError::TooLarge { limit });
                }
                uploader.push(&chunk).await?;
            }
            if cancel.is_cancelled() {
                return Err(BlobError::Cancelled);
            }
            uploader.finish().await
        }
        .await;

        if let Err(e) = streamed {
            debug!(error = %e, "save aborted");
            uploader.abort().await;
            return Err(e);
        }

        debug!(size, "object saved");
        Ok(SavedObject {
            key: key.to_owned(),
            size,
        })
    }

    async fn open_range_stream(
        &self,
        key: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> Result<BlobStream, BlobError> {
        if cancel.is_cancelled() {
            return Err(BlobError::Cancelled);
        }
        let object_key = self.object_key(key)?;

        let mut request = self.client.get_object().bucket(&self.bucket).key(&object_key);
        if let Some(range) = range {
            // Resolve locally so range errors look the same on every backend.
            let meta = self
                .head(key)
                .await?
                .ok_or_else(|| BlobError::NotFound(key.to_owned()))?;
            let (offset, len) = range.resolve(meta.size)?;
            if len == 0 {
                return Ok(stream::empty().boxed());
            }
            request = request.range(ByteRange::inclusive(offset, offset + len - 1).to_header());
        }

        let object = match request.send().await {
            Ok(object) => object,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_no_such_key()) => {
                return Err(BlobError::NotFound(key.to_owned()));
            }
            Err(e) => return Err(sdk_failure("GetObject", &e)),
        };

        let body = stream::try_unfold(object.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(std::io::Error::other(e)),
            }
        });
        Ok(interruptible(body.boxed(), cancel.clone()))
    }

    async fn get_meta(
        &self,
        key: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<ObjectMeta>, BlobError> {
        self.head(key).await
    }

    #[instrument(skip(self, _cancel), fields(bucket = %self.bucket, key = %key))]
    async fn delete(&self, key: &str, _cancel: &CancellationToken) -> Result<(), BlobError> {
        let object_key = self.object_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| sdk_failure("DeleteObject", &e))?;
        debug!("object deleted");
        Ok(())
    }

    fn list_keys<'a>(
        &'a self,
        prefix: Option<&'a str>,
        cancel: &'a CancellationToken,
    ) -> KeyStream<'a> {
        let full_prefix = format!("{}{}", self.prefix, prefix.unwrap_or_default());

        // State: (continuation token, whether another page may follow).
        stream::try_unfold(
            (None::<String>, true),
            move |(token, more)| {
                let full_prefix = full_prefix.clone();
                async move {
                    if !more {
                        return Ok(None);
                    }
                    if cancel.is_cancelled() {
                        return Err(BlobError::Cancelled);
                    }
                    let page = self
                        .client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(full_prefix)
                        .set_continuation_token(token)
                        .send()
                        .await
                        .map_err(|e| sdk_failure("ListObjectsV2", &e))?;

                    let keys: Vec<Result<String, BlobError>> = page
                        .contents()
                        .iter()
                        .filter_map(|object| object.key())
                        .filter_map(|k| k.strip_prefix(self.prefix.as_str()))
                        .map(|k| Ok(k.to_owned()))
                        .collect();
                    let next = page.next_continuation_token().map(str::to_owned);
                    let more = page.is_truncated().unwrap_or(false) && next.is_some();
                    Ok(Some((stream::iter(keys), (next, more))))
                }
            },
        )
        .try_flatten()
        .boxed()
    }

    async fn health_check(&self) -> bool {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    bucket = %self.bucket,
                    error = %aws_sdk_s3::error::DisplayErrorContext(&e),
                    "S3 health check failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> aws_sdk_s3::Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }

    #[test]
    fn keys_are_prefixed() {
        let config = S3BlobConfig::new("us-east-1", "files").with_prefix("lapse/");
        let store = S3ByteStore::with_client(&config, offline_client());
        assert_eq!(store.object_key("ab/abcdef").unwrap(), "lapse/ab/abcdef");
        assert!(matches!(
            store.object_key("/abs"),
            Err(BlobError::InvalidKey(_))
        ));
        assert!(matches!(store.object_key(""), Err(BlobError::InvalidKey(_))));
    }

    #[test]
    fn debug_hides_client() {
        let config = S3BlobConfig::new("us-east-1", "files");
        let store = S3ByteStore::with_client(&config, offline_client());
        let debug = format!("{store:?}");
        assert!(debug.contains("files"));
        assert!(debug.contains("<S3Client>"));
    }
}
