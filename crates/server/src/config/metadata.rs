use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ServerError;

/// Configuration for the metadata store backend.
#[derive(Debug, Deserialize)]
pub struct MetadataBackendConfig {
    /// Which backend to use: `"fs"` or `"redis"`.
    #[serde(default = "default_metadata_backend")]
    pub backend: String,

    /// Document path for the `fs` backend.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,

    /// Connection URL for the `redis` backend (e.g. `redis://localhost:6379`).
    pub url: Option<String>,

    /// Key prefix for the `redis` backend. Defaults to `"lapse"`.
    pub prefix: Option<String>,

    /// Maximum pooled connections for the `redis` backend.
    pub pool_size: Option<usize>,

    /// Seconds to wait for a pooled connection.
    pub connection_timeout_seconds: Option<u64>,
}

impl Default for MetadataBackendConfig {
    fn default() -> Self {
        Self {
            backend: default_metadata_backend(),
            path: default_metadata_path(),
            url: None,
            prefix: None,
            pool_size: None,
            connection_timeout_seconds: None,
        }
    }
}

impl MetadataBackendConfig {
    pub(crate) fn validate(&self) -> Result<(), ServerError> {
        match self.backend.as_str() {
            "fs" | "redis" => Ok(()),
            other => Err(ServerError::Config(format!(
                "[metadata] unknown backend: {other}"
            ))),
        }
    }
}

fn default_metadata_backend() -> String {
    "fs".to_owned()
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("data/metadata.json")
}
