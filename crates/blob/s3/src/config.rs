use serde::{Deserialize, Serialize};

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default multipart part size.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// Connection settings shared by every AWS client.
///
/// Holds the region, an optional STS assume-role ARN and an endpoint URL
/// override for S3-compatible services (`MinIO`, `LocalStack`).
#[derive(Clone, Serialize, Deserialize)]
pub struct AwsBaseConfig {
    /// AWS region (e.g. `"us-east-1"`).
    pub region: String,

    /// Optional IAM role ARN to assume via STS.
    #[serde(default)]
    pub role_arn: Option<String>,

    /// Optional endpoint URL override.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Optional STS session name (defaults to `"lapse-storage"`).
    #[serde(default)]
    pub session_name: Option<String>,

    /// Optional external ID for cross-account trust policies.
    #[serde(default)]
    pub external_id: Option<String>,
}

impl std::fmt::Debug for AwsBaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsBaseConfig")
            .field("region", &self.region)
            .field("role_arn", &self.role_arn.as_ref().map(|_| "[REDACTED]"))
            .field("endpoint_url", &self.endpoint_url)
            .field("session_name", &self.session_name)
            .field("external_id", &self.external_id.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AwsBaseConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            role_arn: None,
            endpoint_url: None,
            session_name: None,
            external_id: None,
        }
    }
}

impl Default for AwsBaseConfig {
    fn default() -> Self {
        Self::new("us-east-1")
    }
}

/// Configuration for the S3 byte store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3BlobConfig {
    /// Region, credentials and endpoint.
    #[serde(flatten)]
    pub aws: AwsBaseConfig,

    /// Bucket holding the objects.
    pub bucket: String,

    /// Prefix prepended to every key (e.g. `"lapse/"`).
    #[serde(default)]
    pub prefix: Option<String>,

    /// Multipart part size in bytes. Values below 5 MiB are raised to 5 MiB.
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Address the bucket as a path segment instead of a subdomain.
    /// Required by most S3-compatible servers.
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_part_size() -> usize {
    DEFAULT_PART_SIZE
}

impl S3BlobConfig {
    /// Create a config for `bucket` in `region`.
    pub fn new(region: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            aws: AwsBaseConfig::new(region),
            bucket: bucket.into(),
            prefix: None,
            part_size: DEFAULT_PART_SIZE,
            force_path_style: false,
        }
    }

    /// Set the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set the endpoint URL override and switch to path-style addressing.
    #[must_use]
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.aws.endpoint_url = Some(endpoint_url.into());
        self.force_path_style = true;
        self
    }

    /// Set the IAM role ARN to assume.
    #[must_use]
    pub fn with_role_arn(mut self, role_arn: impl Into<String>) -> Self {
        self.aws.role_arn = Some(role_arn.into());
        self
    }

    /// Set the multipart part size.
    #[must_use]
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    /// Part size actually used for uploads.
    pub fn effective_part_size(&self) -> usize {
        self.part_size.max(MIN_PART_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_bucket_and_defaults() {
        let config = S3BlobConfig::new("eu-west-1", "files");
        assert_eq!(config.aws.region, "eu-west-1");
        assert_eq!(config.bucket, "files");
        assert_eq!(config.effective_part_size(), DEFAULT_PART_SIZE);
        assert!(!config.force_path_style);
    }

    #[test]
    fn part_size_has_a_floor() {
        let config = S3BlobConfig::new("us-east-1", "b").with_part_size(1024);
        assert_eq!(config.effective_part_size(), MIN_PART_SIZE);
    }

    #[test]
    fn endpoint_override_enables_path_style() {
        let config = S3BlobConfig::new("us-east-1", "b").with_endpoint_url("http://localhost:9000");
        assert!(config.force_path_style);
        assert_eq!(
            config.aws.endpoint_url.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn debug_redacts_role_arn() {
        let config = S3BlobConfig::new("us-east-1", "b")
            .with_role_arn("arn:aws:iam::123456789012:role/files");
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("123456789012"));
    }

    #[test]
    fn deserializes_flattened_aws_fields() {
        let config: S3BlobConfig = serde_json::from_str(
            r#"{"region":"ap-south-1","bucket":"tmp","prefix":"lapse/","endpoint_url":"http://minio:9000"}"#,
        )
        .unwrap();
        assert_eq!(config.aws.region, "ap-south-1");
        assert_eq!(config.prefix.as_deref(), Some("lapse/"));
        assert_eq!(config.part_size, DEFAULT_PART_SIZE);
        assert_eq!(
            config.aws.endpoint_url.as_deref(),
            Some("http://minio:9000")
        );
    }
}
