//! OCI Runtime Specification types.
//!
//! Based on the OCI Runtime Specification v1.2.0:
//! <https://github.com/opencontainers/runtime-spec/blob/main/config.md>
//!
//! Only the mount descriptor is modelled here; it is what the build-step
//! mount resolver hands to the process that performs the mounts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Mount type for bind mounts.
pub const TYPE_BIND: &str = "bind";

/// Mount type for in-memory mounts.
pub const TYPE_TMPFS: &str = "tmpfs";

/// Mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount destination path (inside container).
    pub destination: PathBuf,
    /// Mount type (e.g., "bind", "tmpfs", "proc").
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    /// Mount source path (outside container).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Mount options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Mount {
    /// A bind mount of `source` at `destination`.
    pub fn bind(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        options: Vec<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            mount_type: Some(TYPE_BIND.to_string()),
            source: Some(source.into()),
            options,
        }
    }

    /// A tmpfs mount at `destination`.
    pub fn tmpfs(destination: impl Into<PathBuf>, options: Vec<String>) -> Self {
        Self {
            destination: destination.into(),
            mount_type: Some(TYPE_TMPFS.to_string()),
            source: Some(PathBuf::from(TYPE_TMPFS)),
            options,
        }
    }

    /// Whether this is a bind mount.
    #[must_use]
    pub fn is_bind(&self) -> bool {
        self.mount_type.as_deref() == Some(TYPE_BIND)
    }

    /// The mount source, or an empty path.
    #[must_use]
    pub fn source_path(&self) -> &Path {
        self.source.as_deref().unwrap_or_else(|| Path::new(""))
    }
}
