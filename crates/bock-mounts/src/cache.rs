//! `type=cache` mounts.
//!
//! A cache mount is a bind mount of a directory that outlives the build
//! step. Host-backed entries live under the per-user cache parent and are
//! named after a hash of their `id=` (or target), so every build that asks
//! for the same ID sees the same directory. `sharing=locked` serialises
//! users of an entry through a lock file kept next to the entries.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bock_common::paths::{CACHE_LOCKFILE, cache_lock_dir};
use bock_common::{BockError, BockResult};
use bock_oci::Mount;
use sha2::{Digest, Sha256};

use crate::config::MountConfig;
use crate::context::MountContext;
use crate::fsutil;
use crate::lock::CacheLock;
use crate::options::{MountOptions, PROPAGATION_MODES, Readability};
use crate::parse::MountArg;
use crate::validate::{eval_in_root, resolve_destination};

/// Length of the hashed directory name.
const DIR_ID_LEN: usize = 16;

/// How concurrent users of one cache entry are coordinated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Sharing {
    /// Any number of concurrent users.
    #[default]
    Shared,
    /// One user at a time.
    Locked,
}

impl FromStr for Sharing {
    type Err = BockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Self::Shared),
            "locked" => Ok(Self::Locked),
            other => Err(BockError::UnrecognizedSharingMode {
                value: other.to_string(),
            }),
        }
    }
}

/// A resolved cache mount and the lock held for it, if any.
#[derive(Debug)]
pub struct CacheMount {
    /// The mount to hand to the runtime.
    pub mount: Mount,
    /// Held for `sharing=locked` until the build step is done.
    pub lock: Option<CacheLock>,
}

/// Directory name for a cache key.
#[must_use]
pub fn cache_dir_id(key: &str) -> String {
    let mut id = hex::encode(Sha256::digest(key.as_bytes()));
    id.truncate(DIR_ID_LEN);
    id
}

/// Host directory backing the cache entry for `key`.
#[must_use]
pub fn cache_dir(config: &MountConfig, key: &str) -> PathBuf {
    config.cache_parent().join(cache_dir_id(key))
}

fn cache_attribute(arg: &MountArg, radix: u32) -> BockResult<u32> {
    let value = arg.required_value()?;
    u32::from_str_radix(value, radix).map_err(|_| BockError::InvalidCacheAttribute {
        attribute: arg.key.clone(),
        value: value.to_string(),
    })
}

/// Resolve the tokens of a `type=cache` mount.
///
/// Creates the cache entry if needed and, for `sharing=locked`, blocks
/// until its lock is free. The lock travels with the returned mount and
/// is released when it is dropped, including on every error path after
/// it was taken.
///
/// `held_locks` lists lock files already held by the caller. A locked
/// entry whose lock is among them is not locked again, since a second
/// `flock` from this process would wait on itself; the returned mount
/// then carries no lock.
///
/// # Errors
///
/// Returns an error for unknown or malformed tokens, a missing target,
/// an unknown `from=` stage, an unknown sharing mode, or a failure to
/// create the cache directories or take the lock.
pub fn get_cache_mount(
    args: &[MountArg],
    ctx: &MountContext<'_>,
    held_locks: &HashSet<PathBuf>,
) -> BockResult<CacheMount> {
    let mut options = MountOptions::new();
    let mut source = String::new();
    let mut destination = None;
    let mut from = None;
    let mut id = None;
    let mut sharing = Sharing::default();
    let mut mode = 0o755;
    let mut uid = 0;
    let mut gid = 0;
    let mut explicit_propagation = false;
    let mut explicit_label = false;

    for arg in args {
        match arg.key.as_str() {
            "type" => {}
            "nosuid" | "nodev" | "noexec" | "U" => options.push(arg.key.as_str()),
            "rw" | "readwrite" => options.set_readability(Readability::ReadWrite),
            "ro" | "readonly" => options.set_readability(Readability::ReadOnly),
            "Z" | "z" => {
                options.push(arg.key.as_str());
                explicit_label = true;
            }
            "shared" | "rshared" | "private" | "rprivate" | "slave" | "rslave" => {
                options.push(arg.key.as_str());
                explicit_propagation = true;
            }
            "bind-propagation" => {
                let propagation = arg.required_value()?;
                if !PROPAGATION_MODES.contains(&propagation) {
                    return Err(BockError::BadMountOption {
                        option: arg.to_string(),
                    });
                }
                options.push(propagation);
                explicit_propagation = true;
            }
            "sharing" => sharing = arg.value.as_deref().unwrap_or_default().parse()?,
            "id" => id = Some(arg.required_value()?.to_string()),
            "from" => from = Some(arg.required_value()?.to_string()),
            "src" | "source" => source = arg.required_value()?.to_string(),
            "target" | "dst" | "destination" => {
                destination = Some(resolve_destination(arg.required_value()?, ctx.work_dir)?);
            }
            "mode" => mode = cache_attribute(arg, 8)?,
            "uid" => uid = cache_attribute(arg, 10)?,
            "gid" => gid = cache_attribute(arg, 10)?,
            _ => {
                return Err(BockError::BadMountOption {
                    option: arg.key.clone(),
                });
            }
        }
    }

    // Without an explicit label, a host cache entry is shared between
    // builds and must carry the shared SELinux label.
    if !explicit_label && from.is_none() && ctx.config.selinux.is_enabled() {
        options.push("z");
    }

    let destination: PathBuf = destination.ok_or(BockError::MissingDestination)?;
    let key = id.unwrap_or_else(|| destination.display().to_string());
    let dir_id = cache_dir_id(&key);
    let cache_parent = ctx.config.cache_parent();
    let lock_dir = cache_lock_dir(&cache_parent, &dir_id);

    let source = if let Some(name) = &from {
        let stage = ctx
            .stage(name)
            .filter(|stage| !stage.is_image)
            .ok_or_else(|| BockError::UnresolvedStage { name: name.clone() })?;
        eval_in_root(&stage.mount_point, Path::new(&source))?
    } else {
        fsutil::create_dir_all_mode(&cache_parent, 0o755)?;
        fsutil::create_dir_all_mode(&lock_dir, 0o700)?;
        let dir = cache_parent.join(&dir_id);
        if fsutil::create_dir_owned(&dir, mode, uid, gid)? {
            tracing::debug!(
                key = %key,
                dir = %dir.display(),
                mode = %format!("{mode:o}"),
                uid,
                gid,
                "Created cache directory"
            );
        }
        dir
    };

    let lock = match sharing {
        Sharing::Shared => None,
        Sharing::Locked => {
            let lock_file = lock_dir.join(CACHE_LOCKFILE);
            if held_locks.contains(&lock_file) {
                tracing::debug!(key = %key, path = %lock_file.display(), "Cache lock already held");
                None
            } else {
                fsutil::create_dir_all_mode(&lock_dir, 0o700)?;
                Some(CacheLock::acquire(&lock_file)?)
            }
        }
    };

    if !explicit_propagation {
        options.push("shared");
    }
    if options.readability().is_none() {
        options.set_readability(Readability::ReadWrite);
    }
    options.push("bind");
    let options = options.validate()?;

    tracing::debug!(
        source = %source.display(),
        destination = %destination.display(),
        locked = lock.is_some(),
        "Resolved cache mount"
    );
    Ok(CacheMount {
        mount: Mount::bind(source, destination, options.to_vec()),
        lock,
    })
}
