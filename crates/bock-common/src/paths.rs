//! Standard filesystem paths for Bock.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Default root directory for Bock data.
pub static BOCK_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BOCK_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/bock"))
});

/// Process-wide temporary directory used for build caches and scratch space.
///
/// `BOCK_TMPDIR` takes precedence over `TMPDIR`; the default is `/var/tmp`
/// so that caches survive reboots on hosts with a tmpfs `/tmp`.
pub static BOCK_TMPDIR: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BOCK_TMPDIR")
        .or_else(|_| std::env::var("TMPDIR"))
        .ok()
        .filter(|dir| !dir.is_empty())
        .map_or_else(|| PathBuf::from("/var/tmp"), PathBuf::from)
});

/// Name prefix of the per-user cache parent directory.
pub const CACHE_DIR_PREFIX: &str = "bock-cache";

/// Directory inside the cache parent that holds per-entry lock directories.
pub const CACHE_LOCKFILE_DIR: &str = "bock-cache-lockfiles";

/// Lock file name inside each per-entry lock directory.
pub const CACHE_LOCKFILE: &str = "bock-cache-lockfile";

/// Standard paths used by the Bock tools.
#[derive(Debug, Clone)]
pub struct BockPaths {
    /// Root data directory (default: /var/lib/bock).
    pub root: PathBuf,
}

impl BockPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for extracted images.
    #[must_use]
    pub fn images(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Scratch directory for build-step overlays.
    #[must_use]
    pub fn scratch(&self) -> PathBuf {
        self.root.join("scratch")
    }
}

impl Default for BockPaths {
    fn default() -> Self {
        Self {
            root: BOCK_ROOT.clone(),
        }
    }
}

/// Per-user cache parent: `<tmp>/bock-cache-<uid>`.
#[must_use]
pub fn cache_parent(tmp: &Path, uid: u32) -> PathBuf {
    tmp.join(format!("{CACHE_DIR_PREFIX}-{uid}"))
}

/// Lock directory for one cache entry inside a cache parent.
#[must_use]
pub fn cache_lock_dir(cache_parent: &Path, dir_id: &str) -> PathBuf {
    cache_parent.join(CACHE_LOCKFILE_DIR).join(dir_id)
}
