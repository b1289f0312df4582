use std::path::PathBuf;

/// Configuration for the JSON document metadata store.
#[derive(Debug, Clone)]
pub struct FsMetaConfig {
    /// Path of the metadata document.
    pub path: PathBuf,
}

impl Default for FsMetaConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/metadata.json"),
        }
    }
}

impl FsMetaConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}
