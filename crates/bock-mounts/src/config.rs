//! Mount resolution configuration.

use std::fs;
use std::path::{Path, PathBuf};

use bock_common::paths::{self, BOCK_TMPDIR};
use bock_common::{BockError, BockResult};
use serde::Deserialize;

use crate::selinux::SelinuxMode;

/// Host-wide inputs to mount resolution.
///
/// These are read once and passed down explicitly so that resolution
/// never consults the environment on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConfig {
    /// Temp root under which per-user cache parents live.
    pub tmp_dir: PathBuf,
    /// Unprivileged user ID that owns the cache parent.
    pub rootless_uid: u32,
    /// Host SELinux mode.
    pub selinux: SelinuxMode,
}

/// On-disk form of [`MountConfig`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    tmp_dir: Option<PathBuf>,
    rootless_uid: Option<u32>,
    selinux: Option<SelinuxMode>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from("/var/tmp"),
            rootless_uid: 0,
            selinux: SelinuxMode::Disabled,
        }
    }
}

impl MountConfig {
    /// Configuration for the current process.
    ///
    /// Uses `BOCK_TMPDIR`/`TMPDIR` for the temp root, `BOCK_ROOTLESS_UID`
    /// or the effective UID for the user, and selinuxfs for the mode.
    #[must_use]
    pub fn from_env() -> Self {
        let rootless_uid = std::env::var("BOCK_ROOTLESS_UID")
            .ok()
            .and_then(|uid| uid.parse().ok())
            .unwrap_or_else(|| rustix::process::geteuid().as_raw());

        Self {
            tmp_dir: BOCK_TMPDIR.clone(),
            rootless_uid,
            selinux: SelinuxMode::detect(),
        }
    }

    /// Load a TOML configuration file; absent keys fall back to
    /// [`MountConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> BockResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content, Self::from_env())
    }

    fn from_toml(content: &str, base: Self) -> BockResult<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| BockError::Config {
            message: e.to_string(),
        })?;

        Ok(Self {
            tmp_dir: file.tmp_dir.unwrap_or(base.tmp_dir),
            rootless_uid: file.rootless_uid.unwrap_or(base.rootless_uid),
            selinux: file.selinux.unwrap_or(base.selinux),
        })
    }

    /// Set the temp root.
    #[must_use]
    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = tmp_dir.into();
        self
    }

    /// Set the unprivileged user ID.
    #[must_use]
    pub const fn with_rootless_uid(mut self, uid: u32) -> Self {
        self.rootless_uid = uid;
        self
    }

    /// Set the SELinux mode.
    #[must_use]
    pub const fn with_selinux(mut self, selinux: SelinuxMode) -> Self {
        self.selinux = selinux;
        self
    }

    /// Per-user cache parent directory.
    #[must_use]
    pub fn cache_parent(&self) -> PathBuf {
        paths::cache_parent(&self.tmp_dir, self.rootless_uid)
    }
}
