//! Inputs shared by every mount resolver.

use std::path::Path;

use crate::config::MountConfig;
use crate::overlay::OverlayDriver;
use crate::store::{ImageStore, StageMount, StageMounts};

/// Everything a build step hands to mount resolution.
#[derive(Clone, Copy)]
pub struct MountContext<'a> {
    /// Image lookup and mounting for `from=` bind mounts.
    pub store: &'a dyn ImageStore,
    /// Overlay primitive for writable and image-backed bind mounts.
    pub overlay: &'a dyn OverlayDriver,
    /// Host-wide configuration.
    pub config: &'a MountConfig,
    /// SELinux label for mounted images and overlays; empty for none.
    pub mount_label: &'a str,
    /// Directory that bind and cache sources are resolved inside.
    pub context_dir: Option<&'a Path>,
    /// Container working directory, for relative targets.
    pub work_dir: &'a Path,
    /// Where overlay directories are allocated.
    pub scratch_dir: &'a Path,
    /// Named stages and images that `from=` may refer to.
    pub stage_mounts: Option<&'a StageMounts>,
}

impl<'a> MountContext<'a> {
    /// A context with no build context directory, label, or stages.
    pub fn new(
        store: &'a dyn ImageStore,
        overlay: &'a dyn OverlayDriver,
        config: &'a MountConfig,
        work_dir: &'a Path,
        scratch_dir: &'a Path,
    ) -> Self {
        Self {
            store,
            overlay,
            config,
            mount_label: "",
            context_dir: None,
            work_dir,
            scratch_dir,
            stage_mounts: None,
        }
    }

    /// Resolve bind and cache sources inside `dir`.
    #[must_use]
    pub const fn with_context_dir(mut self, dir: &'a Path) -> Self {
        self.context_dir = Some(dir);
        self
    }

    /// Label mounted images and overlays.
    #[must_use]
    pub const fn with_mount_label(mut self, label: &'a str) -> Self {
        self.mount_label = label;
        self
    }

    /// Make stages available to `from=`.
    #[must_use]
    pub const fn with_stage_mounts(mut self, stages: &'a StageMounts) -> Self {
        self.stage_mounts = Some(stages);
        self
    }

    /// Look up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&'a StageMount> {
        self.stage_mounts.and_then(|stages| stages.get(name))
    }
}
