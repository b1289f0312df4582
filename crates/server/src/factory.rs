use std::sync::Arc;

use tracing::info;

use lapse_blob::ByteStore;
use lapse_blob_fs::{FsBlobConfig, FsByteStore};
#[cfg(feature = "s3")]
use lapse_blob_s3::{S3BlobConfig, S3ByteStore};
use lapse_meta::MetadataStore;
use lapse_meta_fs::{FsMetaConfig, FsMetadataStore};
#[cfg(feature = "redis")]
use lapse_meta_redis::{RedisConfig, RedisMetadataStore};

use crate::config::{BlobBackendConfig, MetadataBackendConfig};
use crate::error::ServerError;

/// Create a byte store from the given configuration.
pub async fn create_byte_store(
    config: &BlobBackendConfig,
) -> Result<Arc<dyn ByteStore>, ServerError> {
    let store: Arc<dyn ByteStore> = match config.backend.as_str() {
        "fs" => Arc::new(FsByteStore::new(FsBlobConfig::new(config.root.clone())).await?),
        #[cfg(feature = "s3")]
        "s3" => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                ServerError::Config("s3 byte store requires [blob] bucket".into())
            })?;
            let region = config.region.as_deref().unwrap_or("us-east-1");

            let mut s3_config = S3BlobConfig::new(region, bucket);
            if let Some(prefix) = &config.prefix {
                s3_config = s3_config.with_prefix(prefix);
            }
            if let Some(endpoint) = &config.endpoint_url {
                s3_config = s3_config.with_endpoint_url(endpoint);
            }
            if let Some(role_arn) = &config.role_arn {
                s3_config = s3_config.with_role_arn(role_arn);
            }
            if let Some(part_size) = config.part_size {
                s3_config = s3_config.with_part_size(part_size);
            }

            Arc::new(S3ByteStore::new(&s3_config).await)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported byte store backend: {other} (is the feature enabled?)"
            )));
        }
    };

    info!(backend = %config.backend, "byte store initialized");
    Ok(store)
}

/// Create a metadata store from the given configuration and run its
/// initialization.
pub async fn create_metadata_store(
    config: &MetadataBackendConfig,
) -> Result<Arc<dyn MetadataStore>, ServerError> {
    let store: Arc<dyn MetadataStore> = match config.backend.as_str() {
        "fs" => Arc::new(FsMetadataStore::new(FsMetaConfig::new(config.path.clone()))),
        #[cfg(feature = "redis")]
        "redis" => {
            let defaults = RedisConfig::default();
            let redis_config = RedisConfig {
                url: config.url.clone().unwrap_or(defaults.url),
                prefix: config.prefix.clone().unwrap_or(defaults.prefix),
                pool_size: config.pool_size.unwrap_or(defaults.pool_size),
                connection_timeout: config
                    .connection_timeout_seconds
                    .map_or(defaults.connection_timeout, std::time::Duration::from_secs),
            };
            Arc::new(RedisMetadataStore::new(&redis_config)?)
        }
        other => {
            return Err(ServerError::Config(format!(
                "unsupported metadata backend: {other} (is the feature enabled?)"
            )));
        }
    };

    store.init().await?;
    info!(backend = %config.backend, "metadata store initialized");
    Ok(store)
}
