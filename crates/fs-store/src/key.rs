use std::path::{Component, Path, PathBuf};

use bucketferry_transfer::StoreError;

/// Directory under the store root holding in-progress uploads.
pub(crate) const STAGING_DIR: &str = ".uploads";

/// Maps an object key to a path relative to the store root.
///
/// Keys are `/`-separated relative paths. Rejects:
/// - Empty keys
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Keys inside the staging directory
pub(crate) fn key_to_path(key: &str) -> Result<PathBuf, StoreError> {
    let invalid = |reason: &str| StoreError::InvalidKey(format!("{reason}: {key}"));

    if key.trim().is_empty() {
        return Err(StoreError::InvalidKey("empty key".into()));
    }

    let mut rel = PathBuf::new();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent directory traversal")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute key")),
        }
    }

    match rel.components().next() {
        None => Err(invalid("key names no file")),
        Some(Component::Normal(first)) if first == STAGING_DIR => {
            Err(invalid("reserved prefix"))
        }
        Some(_) => Ok(rel),
    }
}

/// Inverse of [`key_to_path`] for listing.
pub(crate) fn path_to_key(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
