mod blob;
mod metadata;
mod sweeper;


pub use blob::*;
pub use metadata::*;
pub use sweeper::*;

use std::path::Path;

use serde::Deserialize;

use lapse_core::StorageConfig;

use crate::error::ServerError;

/// Top-level configuration for the Lapse server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct LapseConfig {
    /// Upload policy: size limit, MIME allow-list, TTL bounds, deduplication.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Byte store backend configuration.
    #[serde(default)]
    pub blob: BlobBackendConfig,
    /// Metadata store backend configuration.
    #[serde(default)]
    pub metadata: MetadataBackendConfig,
    /// Lifecycle sweeper configuration.
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

impl LapseConfig {
    /// Parse a configuration document and check it for consistency.
    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file at `path`, or the defaults if it does not
    /// exist. The boolean reports whether the file was found.
    pub fn load(path: &Path) -> Result<(Self, bool), ServerError> {
        if !path.exists() {
            return Ok((Self::parse("")?, false));
        }
        let contents = std::fs::read_to_string(path)?;
        Ok((Self::parse(&contents)?, true))
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        self.storage
            .validate()
            .map_err(|e| ServerError::Config(format!("[storage] {e}")))?;
        self.blob.validate()?;
        self.metadata.validate()?;
        self.sweeper.validate()
    }
}
