use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ServerError;

/// Configuration for the byte store backend.
#[derive(Debug, Deserialize)]
pub struct BlobBackendConfig {
    /// Which backend to use: `"fs"` or `"s3"`.
    #[serde(default = "default_blob_backend")]
    pub backend: String,

    /// Root directory for the `fs` backend.
    #[serde(default = "default_blob_root")]
    pub root: PathBuf,

    /// Bucket name for the `s3` backend.
    pub bucket: Option<String>,

    /// AWS region for the `s3` backend. Defaults to `"us-east-1"`.
    pub region: Option<String>,

    /// Key prefix inside the bucket.
    pub prefix: Option<String>,

    /// Custom endpoint (`LocalStack`, `MinIO`). Enables path-style addressing.
    pub endpoint_url: Option<String>,

    /// IAM role to assume before talking to S3.
    pub role_arn: Option<String>,

    /// Multipart upload part size in bytes.
    pub part_size: Option<usize>,
}

impl Default for BlobBackendConfig {
    fn default() -> Self {
        Self {
            backend: default_blob_backend(),
            root: default_blob_root(),
            bucket: None,
            region: None,
            prefix: None,
            endpoint_url: None,
            role_arn: None,
            part_size: None,
        }
    }
}

impl BlobBackendConfig {
    pub(crate) fn validate(&self) -> Result<(), ServerError> {
        match self.backend.as_str() {
            "fs" => Ok(()),
            "s3" if self.bucket.as_deref().is_none_or(str::is_empty) => Err(ServerError::Config(
                "[blob] backend \"s3\" requires a bucket".to_owned(),
            )),
            "s3" => Ok(()),
            other => Err(ServerError::Config(format!(
                "[blob] unknown backend: {other}"
            ))),
        }
    }
}

fn default_blob_backend() -> String {
    "fs".to_owned()
}

fn default_blob_root() -> PathBuf {
    PathBuf::from("data/blobs")
}
