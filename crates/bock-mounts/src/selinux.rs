//! SELinux state detection.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Mount point of selinuxfs.
const SELINUX_FS: &str = "/sys/fs/selinux";

/// Host SELinux mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelinuxMode {
    /// SELinux is not enabled.
    #[default]
    Disabled,
    /// Policy is loaded but not enforced.
    Permissive,
    /// Policy is enforced.
    Enforcing,
}

impl SelinuxMode {
    /// Read the current mode from selinuxfs.
    #[must_use]
    pub fn detect() -> Self {
        Self::detect_at(Path::new(SELINUX_FS))
    }

    /// Read the mode from a selinuxfs mounted at `fs_root`.
    #[must_use]
    pub fn detect_at(fs_root: &Path) -> Self {
        match fs::read_to_string(fs_root.join("enforce")) {
            Ok(s) if s.trim() == "1" => Self::Enforcing,
            Ok(_) => Self::Permissive,
            Err(_) => Self::Disabled,
        }
    }

    /// Whether labels are applied at all (permissive or enforcing).
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_from_enforce_file() {
        let fs_root = tempdir().unwrap();
        assert_eq!(SelinuxMode::detect_at(fs_root.path()), SelinuxMode::Disabled);

        fs::write(fs_root.path().join("enforce"), "0\n").unwrap();
        assert_eq!(SelinuxMode::detect_at(fs_root.path()), SelinuxMode::Permissive);

        fs::write(fs_root.path().join("enforce"), "1\n").unwrap();
        assert_eq!(SelinuxMode::detect_at(fs_root.path()), SelinuxMode::Enforcing);
        assert!(SelinuxMode::Enforcing.is_enabled());
        assert!(!SelinuxMode::Disabled.is_enabled());
    }
}
