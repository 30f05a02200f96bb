//! Path validation
//!
//! Normalises caller-supplied virtual paths and maps them onto the storage
//! root. Virtual paths are always absolute, `/`-separated and free of `.`
//! and `..` components once they leave this module.

use std::path::{Path, PathBuf};

use crate::error::ArbiterError;

/// Maximum number of components accepted in a virtual path.
pub const MAX_PATH_DEPTH: usize = 64;

/// Prefix of the hidden names used while a deletion is in flight.
pub const TOMBSTONE_PREFIX: &str = ".arbiter-tombstone-";

/// Normalises a virtual path: collapses repeated separators and `.`
/// components, strips trailing separators and rejects traversal.
pub fn normalize_virtual_path(path: &str) -> Result<String, ArbiterError> {
    if path.trim().is_empty() {
        return Err(ArbiterError::InvalidPath("empty path".into()));
    }
    if path.contains('\0') || path.contains('\\') {
        return Err(ArbiterError::InvalidPath(path.to_string()));
    }

    let mut parts = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(ArbiterError::InvalidPath(path.to_string())),
            name => parts.push(name),
        }
    }

    if parts.len() > MAX_PATH_DEPTH {
        return Err(ArbiterError::InvalidPath(format!(
            "{} exceeds {} components",
            path, MAX_PATH_DEPTH
        )));
    }
    if parts.iter().any(|name| is_tombstone_name(name)) {
        return Err(ArbiterError::InvalidPath(path.to_string()));
    }

    Ok(format!("/{}", parts.join("/")))
}

/// Maps a normalised virtual path onto the storage root.
pub fn virtual_to_real_path(storage_root: &Path, virtual_path: &str) -> PathBuf {
    let relative = virtual_path.trim_start_matches('/');
    if relative.is_empty() {
        storage_root.to_path_buf()
    } else {
        storage_root.join(relative)
    }
}

/// Maps a real path below the storage root back to its virtual path.
pub fn real_to_virtual_path(storage_root: &Path, real_path: &Path) -> Option<String> {
    let relative = real_path.strip_prefix(storage_root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(format!("/{}", parts.join("/")))
}

pub fn join_virtual(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parent of a normalised virtual path; the root is its own parent.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// True when `path` lies strictly below `ancestor`.
pub fn is_strict_descendant(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// True when `path` is `ancestor` or lies below it.
pub fn is_within(ancestor: &str, path: &str) -> bool {
    path == ancestor || is_strict_descendant(ancestor, path)
}

/// Replaces the `from` prefix of `path` with `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    match path.strip_prefix(from) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("{}{}", to, rest),
        _ => path.to_string(),
    }
}

pub fn is_tombstone_name(name: &str) -> bool {
    name.starts_with(TOMBSTONE_PREFIX)
}
