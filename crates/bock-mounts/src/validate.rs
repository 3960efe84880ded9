//! Host and container path checks.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};

use bock_common::{BockError, BockResult};

/// Maximum number of symlinks followed by [`eval_in_root`].
const MAX_SYMLINK_HOPS: usize = 255;

fn invalid(path: &Path, reason: impl Into<String>) -> BockError {
    BockError::InvalidPath {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Check a host-side mount source.
///
/// Absolute paths must exist. Relative names are accepted: they name
/// volumes rather than host paths.
///
/// # Errors
///
/// Returns an error for an empty path or a missing absolute path.
pub fn validate_host_dir(host_dir: &str) -> BockResult<()> {
    if host_dir.is_empty() {
        return Err(invalid(Path::new(host_dir), "host directory cannot be empty"));
    }
    let path = Path::new(host_dir);
    if path.is_absolute() {
        fs::metadata(path).map_err(|e| invalid(path, e.to_string()))?;
    }
    Ok(())
}

/// Check a container-side mount destination.
///
/// # Errors
///
/// Returns an error for an empty or relative path.
pub fn validate_container_dir(ctr_dir: &Path) -> BockResult<()> {
    if ctr_dir.as_os_str().is_empty() {
        return Err(invalid(ctr_dir, "container directory cannot be empty"));
    }
    if !ctr_dir.is_absolute() {
        return Err(invalid(ctr_dir, "must be an absolute path"));
    }
    Ok(())
}

/// Lexically normalise a path: drop `.`, fold `..`, collapse separators.
///
/// `..` at the root of an absolute path stays at the root.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !path.is_absolute() {
                    out.push("..");
                }
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Resolve a `target=` value against the working directory and check it.
///
/// # Errors
///
/// Returns an error if the result is not a legal container path.
pub fn resolve_destination(target: &str, work_dir: &Path) -> BockResult<PathBuf> {
    let target = Path::new(target);
    let joined = if target.is_absolute() {
        target.to_path_buf()
    } else {
        work_dir.join(target)
    };
    validate_container_dir(&joined)?;
    Ok(clean_path(&joined))
}

enum Part {
    Parent,
    Name(OsString),
}

fn parts(path: &Path) -> Vec<Part> {
    path.components()
        .filter_map(|component| match component {
            Component::ParentDir => Some(Part::Parent),
            Component::Normal(name) => Some(Part::Name(name.to_os_string())),
            _ => None,
        })
        .collect()
}

/// Resolve `path` as if `root` were `/`.
///
/// Absolute and relative inputs are both taken relative to `root`.
/// Symlinks are followed, with absolute link targets re-rooted at `root`.
/// Any `..` that would climb above `root` is rejected. The final path
/// does not need to exist.
///
/// # Errors
///
/// Returns [`BockError::InvalidPath`] on traversal out of `root` or too
/// many symlinks, and I/O errors from reading links.
pub fn eval_in_root(root: &Path, path: &Path) -> BockResult<PathBuf> {
    let mut resolved: Vec<OsString> = Vec::new();
    let mut pending: VecDeque<Part> = parts(path).into();
    let mut hops = 0usize;

    while let Some(part) = pending.pop_front() {
        let name = match part {
            Part::Parent => {
                if resolved.pop().is_none() {
                    return Err(invalid(path, format!("escapes {}", root.display())));
                }
                continue;
            }
            Part::Name(name) => name,
        };

        let mut candidate = root.to_path_buf();
        candidate.extend(&resolved);
        candidate.push(&name);

        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(invalid(path, "too many levels of symbolic links"));
                }
                let target = fs::read_link(&candidate)?;
                if target.is_absolute() {
                    resolved.clear();
                }
                for part in parts(&target).into_iter().rev() {
                    pending.push_front(part);
                }
            }
            _ => resolved.push(name),
        }
    }

    let mut out = root.to_path_buf();
    out.extend(&resolved);
    Ok(out)
}
