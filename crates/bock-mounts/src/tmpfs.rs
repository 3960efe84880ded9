//! `type=tmpfs` mounts.

use std::path::Path;

use bock_common::{BockError, BockResult};
use bock_oci::Mount;

use crate::options::{MountOptions, Readability};
use crate::parse::MountArg;
use crate::validate::resolve_destination;

/// Resolve the tokens of a `type=tmpfs` mount.
///
/// `tmpfs-mode` and `tmpfs-size` become the filesystem's `mode=` and
/// `size=` options. A tmpfs has no source.
///
/// # Errors
///
/// Returns an error for unknown or malformed tokens, a `source=`, or a
/// missing target.
pub fn get_tmpfs_mount(args: &[MountArg], work_dir: &Path) -> BockResult<Mount> {
    let mut options = MountOptions::new();
    let mut destination = None;

    for arg in args {
        match arg.key.as_str() {
            "type" => {}
            "ro" | "readonly" => options.set_readability(Readability::ReadOnly),
            "nosuid" | "nodev" | "noexec" | "tmpcopyup" => options.push(arg.key.as_str()),
            "tmpfs-mode" => options.push(format!("mode={}", arg.required_value()?)),
            "tmpfs-size" => options.push(format!("size={}", arg.required_value()?)),
            "src" | "source" => {
                return Err(BockError::SourceNotSupported {
                    mount_type: "tmpfs".to_string(),
                });
            }
            "target" | "dst" | "destination" => {
                destination = Some(resolve_destination(arg.required_value()?, work_dir)?);
            }
            _ => {
                return Err(BockError::BadMountOption {
                    option: arg.key.clone(),
                });
            }
        }
    }

    let destination = destination.ok_or(BockError::MissingDestination)?;
    tracing::debug!(destination = %destination.display(), "Resolved tmpfs mount");
    Ok(Mount::tmpfs(destination, options.to_vec()))
}
