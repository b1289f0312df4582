use std::path::PathBuf;

/// Configuration for the filesystem byte store.
#[derive(Debug, Clone)]
pub struct FsBlobConfig {
    /// Directory holding objects and staging files.
    pub root: PathBuf,
}

impl Default for FsBlobConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/blobs"),
        }
    }
}

impl FsBlobConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}
