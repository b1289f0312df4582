use std::path::{Component, Path, PathBuf};

use lapse_blob::BlobError;

/// Suffix of the sidecar file holding content type and user metadata.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Map a store key to a path relative to the objects directory.
///
/// Keys are `/`-separated. Empty segments, `.`/`..`, absolute paths and
/// names that collide with sidecar files are rejected.
pub fn key_to_relative(key: &str) -> Result<PathBuf, BlobError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(BlobError::InvalidKey(key.to_owned()));
    }
    if key.ends_with(SIDECAR_SUFFIX) {
        return Err(BlobError::InvalidKey(key.to_owned()));
    }
    let mut path = PathBuf::new();
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(BlobError::InvalidKey(key.to_owned()));
        }
        path.push(segment);
    }
    // Every segment must parse as a plain path component on this platform.
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(BlobError::InvalidKey(key.to_owned()));
    }
    Ok(path)
}

/// Render a path relative to the objects directory back into a key.
pub fn relative_to_key(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Sidecar path for an object path.
pub fn sidecar_path(object_path: &Path) -> PathBuf {
    let mut name = object_path.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_sharded_keys() {
        let path = key_to_relative("ab/abcdef").unwrap();
        assert_eq!(path, Path::new("ab").join("abcdef"));
        assert_eq!(relative_to_key(&path).as_deref(), Some("ab/abcdef"));
    }

    #[test]
    fn rejects_traversal_and_absolute_keys() {
        for bad in ["", "/etc/passwd", "../up", "a/../b", "a//b", "a/./b", "x.meta.json", "a\\b"] {
            assert!(
                matches!(key_to_relative(bad), Err(BlobError::InvalidKey(_))),
                "key {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn sidecar_appends_suffix() {
        let p = sidecar_path(Path::new("/data/objects/ab/abc"));
        assert_eq!(p, Path::new("/data/objects/ab/abc.meta.json"));
    }
}
