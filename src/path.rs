// src/path.rs

//! Path sanitization for untrusted inputs
//!
//! Package file manifests, archive entries, and script paths all come from
//! untrusted sources. Everything that ends up joined onto the target root
//! goes through these helpers first.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Sanitize a path from an untrusted source
///
/// Strips leading slashes and `.` components, rejects `..` components, and
/// returns an error for paths that are empty after normalization.
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy();

    let relative = path_str.trim_start_matches('/');

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal(path_str.to_string()));
            }
            Component::Prefix(_) | Component::RootDir => {}
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Error::InvalidPath(path_str.to_string()));
    }

    Ok(normalized)
}

/// Safely join a root path with an untrusted path
///
/// Sanitizes the path first, then verifies the joined result still lives
/// under the root when both sides can be canonicalized.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let sanitized = sanitize_path(path.as_ref())?;
    let joined = root.join(&sanitized);

    // Canonicalization only succeeds for paths that already exist; when it
    // does, it catches symlink escapes the lexical check above cannot.
    if let (Ok(canonical_root), Ok(canonical_joined)) = (root.canonicalize(), joined.canonicalize())
    {
        if !canonical_joined.starts_with(&canonical_root) {
            return Err(Error::PathTraversal(format!(
                "{} escapes {}",
                joined.display(),
                root.display()
            )));
        }
    }

    Ok(joined)
}
