// src/watch/path_utils.rs

//! Utility functions for path handling in the watch router.

use std::path::{Component, Path, PathBuf};

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// Tries a plain `strip_prefix(root)` first and falls back to comparing
/// canonicalized paths (symlinks, `/private/var` on macOS). Removed files
/// cannot be canonicalized, so the fallback canonicalizes their parent.
///
/// Returns `None` if the path is not below `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(to_slashes(rel));
    }

    let root_canon = root.canonicalize().ok()?;
    let path_canon = match path.canonicalize() {
        Ok(p) => p,
        Err(_) => {
            let parent = path.parent()?.canonicalize().ok()?;
            parent.join(path.file_name()?)
        }
    };

    path_canon
        .strip_prefix(&root_canon)
        .ok()
        .map(to_slashes)
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// `..` directly below a root is dropped; leading `..` of a relative path
/// is kept. An empty result becomes `.`.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// Canonical form of `path` even if it does not exist yet: the path is
/// normalized lexically, then its deepest existing ancestor is
/// canonicalized and the missing components are re-attached.
pub fn resolve_path(path: &Path) -> PathBuf {
    let lexical = normalize_lexically(path);
    let mut existing = lexical.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing.iter().rev().fold(canonical, |acc, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

/// Whether `path` lies inside `dir` (or is `dir` itself).
pub fn is_within(path: &Path, dir: &Path) -> bool {
    path.starts_with(dir)
}

fn to_slashes(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}
