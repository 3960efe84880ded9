//! Side resources acquired while resolving mounts, and their release.

use std::mem;
use std::path::PathBuf;

use crate::lock::CacheLock;
use crate::overlay::OverlayDriver;
use crate::store::ImageStore;

/// One resource acquired on behalf of a mount.
#[derive(Debug)]
pub enum SideResource {
    /// An image mounted for a `from=` bind mount, by ID.
    Image(String),
    /// An overlay directory with its merged view.
    OverlayDir(PathBuf),
    /// A held cache lock.
    Lock(CacheLock),
}

impl SideResource {
    fn release(self, store: &dyn ImageStore, overlay: &dyn OverlayDriver) {
        match self {
            Self::Image(id) => {
                if let Err(e) = store.unmount_image(&id) {
                    tracing::debug!(image = %id, error = %e, "Unmounting image failed");
                }
            }
            Self::OverlayDir(dir) => {
                if let Err(e) = overlay.remove_temp(&dir) {
                    tracing::debug!(dir = %dir.display(), error = %e, "Removing overlay failed");
                }
            }
            Self::Lock(lock) => {
                let path = lock.path().to_path_buf();
                if let Err(e) = lock.unlock() {
                    tracing::debug!(path = %path.display(), error = %e, "Unlocking cache failed");
                }
            }
        }
    }
}

/// Cleanup obligations handed to the caller of a successful resolution.
///
/// Everything here stays acquired until [`SideResources::release`] is
/// called, normally once the build step that used the mounts finished.
/// Dropping it only releases the locks.
#[derive(Debug, Default)]
pub struct SideResources {
    /// IDs of images mounted for `from=` bind mounts.
    pub mounted_images: Vec<String>,
    /// Overlay directories to unmount and remove.
    pub overlay_dirs: Vec<PathBuf>,
    /// Cache locks to release.
    pub locks: Vec<CacheLock>,
}

impl SideResources {
    /// Whether nothing was acquired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mounted_images.is_empty() && self.overlay_dirs.is_empty() && self.locks.is_empty()
    }

    /// Remove overlays, unmount images, and release locks.
    ///
    /// Failures are logged and do not stop the remaining releases.
    pub fn release(self, store: &dyn ImageStore, overlay: &dyn OverlayDriver) {
        let resources = self
            .overlay_dirs
            .into_iter()
            .map(SideResource::OverlayDir)
            .chain(self.mounted_images.into_iter().map(SideResource::Image))
            .chain(self.locks.into_iter().map(SideResource::Lock));
        for resource in resources {
            resource.release(store, overlay);
        }
    }

    fn add(&mut self, resource: SideResource) {
        match resource {
            SideResource::Image(id) => self.mounted_images.push(id),
            SideResource::OverlayDir(dir) => self.overlay_dirs.push(dir),
            SideResource::Lock(lock) => self.locks.push(lock),
        }
    }
}

/// Releases everything pushed onto it, newest first, when dropped.
///
/// Call [`Rollback::commit`] once the operation succeeded to keep the
/// resources instead.
pub struct Rollback<'a> {
    store: &'a dyn ImageStore,
    overlay: &'a dyn OverlayDriver,
    acquired: Vec<SideResource>,
}

impl<'a> Rollback<'a> {
    /// An empty guard.
    pub fn new(store: &'a dyn ImageStore, overlay: &'a dyn OverlayDriver) -> Self {
        Self {
            store,
            overlay,
            acquired: Vec::new(),
        }
    }

    /// Track a newly acquired resource.
    pub fn push(&mut self, resource: SideResource) {
        self.acquired.push(resource);
    }

    /// Disarm the guard and hand the resources over, grouped by kind.
    #[must_use]
    pub fn commit(mut self) -> SideResources {
        let mut resources = SideResources::default();
        for resource in mem::take(&mut self.acquired) {
            resources.add(resource);
        }
        resources
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.acquired.is_empty() {
            return;
        }
        tracing::debug!(count = self.acquired.len(), "Rolling back mount resources");
        while let Some(resource) = self.acquired.pop() {
            resource.release(self.store, self.overlay);
        }
    }
}
