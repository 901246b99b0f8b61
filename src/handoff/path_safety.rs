//! Workspace-relative path resolution with traversal and symlink-escape
//! detection.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Resolve `relative` against `workspace` and ensure it stays inside it.
///
/// The workspace is canonicalized, the candidate is normalized
/// lexically, and, when the target exists, canonicalized again so a
/// symlink pointing outside the workspace is caught.
///
/// # Errors
///
/// Returns `AppError::AccessDenied` if:
/// - The candidate is absolute.
/// - A `..` segment climbs above the workspace.
/// - The existing target resolves (through symlinks) outside the workspace.
///
/// Returns `AppError::NotFound` if the workspace itself does not exist.
pub fn resolve_within(workspace: &Path, relative: impl AsRef<Path>) -> Result<PathBuf> {
    let root = workspace.canonicalize().map_err(|err| {
        AppError::NotFound(format!("workspace {} unavailable: {err}", workspace.display()))
    })?;

    let mut normalized = PathBuf::new();
    for component in relative.as_ref().components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::AccessDenied(
                        "path attempts to escape workspace".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::AccessDenied(
                    "absolute paths are not allowed".into(),
                ));
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    let absolute = root.join(normalized);
    if !absolute.starts_with(&root) {
        return Err(AppError::AccessDenied("path outside workspace".into()));
    }

    if !absolute.exists() {
        return Ok(absolute);
    }

    let canonical = absolute
        .canonicalize()
        .map_err(|err| AppError::AccessDenied(format!("cannot resolve path: {err}")))?;
    if !canonical.starts_with(&root) {
        return Err(AppError::AccessDenied(
            "symlink target escapes workspace".into(),
        ));
    }
    Ok(canonical)
}
