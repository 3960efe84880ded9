//! Directory creation with explicit ownership.

use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::Path;

/// Create `path` with `mode` and `uid:gid` unless it already exists.
///
/// Returns whether the directory was created by this call. An existing
/// directory, including one created concurrently by another process, is
/// left untouched. The mode is applied explicitly so the umask does not
/// narrow it.
///
/// # Errors
///
/// Returns any I/O error other than `AlreadyExists`.
pub fn create_dir_owned(path: &Path, mode: u32, uid: u32, gid: u32) -> io::Result<bool> {
    match DirBuilder::new().mode(mode).create(path) {
        Ok(()) => {
            fs::set_permissions(path, Permissions::from_mode(mode))?;
            chown_if_permitted(path, uid, gid)?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create `path` and any missing parents with `mode`.
///
/// # Errors
///
/// Returns any I/O error from directory creation.
pub fn create_dir_all_mode(path: &Path, mode: u32) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(mode).create(path)
}

/// Change ownership of `path` if it differs and the process may do so.
///
/// Without root the kernel refuses to give files away, so an unprivileged
/// caller keeps ownership of what it creates.
///
/// # Errors
///
/// Returns an error if `path` cannot be inspected or `chown` fails.
pub fn chown_if_permitted(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    let meta = fs::metadata(path)?;
    if meta.uid() == uid && meta.gid() == gid {
        return Ok(());
    }
    if rustix::process::geteuid().as_raw() != 0 {
        tracing::debug!(
            path = %path.display(),
            uid,
            gid,
            "Not privileged, keeping current owner"
        );
        return Ok(());
    }
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}
