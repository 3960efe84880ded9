//! Image access for `from=` mounts.
//!
//! Mount resolution only needs to find an image by name, mount it
//! somewhere readable, and later unmount it again.

use std::collections::HashMap;
use std::path::PathBuf;

use bock_common::{BockError, BockResult};
use parking_lot::Mutex;

/// An image found in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    /// Store-assigned image ID, used for unmounting.
    pub id: String,
    /// The name it was looked up by.
    pub name: String,
}

/// A named, already-mounted source that `from=` may refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMount {
    /// Where its content is visible on the host.
    pub mount_point: PathBuf,
    /// Whether it is an image rather than a stage or build context.
    pub is_image: bool,
}

impl StageMount {
    /// A build stage or additional build context.
    pub fn stage(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            is_image: false,
        }
    }

    /// A pre-mounted image.
    pub fn image(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            is_image: true,
        }
    }
}

/// Named additional mount points, keyed by the name used in `from=`.
pub type StageMounts = HashMap<String, StageMount>;

/// Image lookup and mounting.
pub trait ImageStore {
    /// Find an image by name or reference.
    ///
    /// # Errors
    ///
    /// Returns [`BockError::ImageNotFound`] if there is no such image.
    fn lookup_image(&self, name: &str) -> BockResult<ImageHandle>;

    /// Mount an image read-only and return its mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be mounted.
    fn mount_image(&self, image: &ImageHandle, mount_label: &str) -> BockResult<PathBuf>;

    /// Release one mount of an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is not mounted.
    fn unmount_image(&self, id: &str) -> BockResult<()>;

    /// Driver options to pass on to overlay mounts.
    fn graph_options(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Store of pre-extracted images laid out as `<root>/<name>/rootfs`.
///
/// Names are flattened by replacing `/`, `:` and `@` with `_`. Mounting
/// hands out the `rootfs` directory and keeps a reference count.
#[derive(Debug)]
pub struct DirectoryImageStore {
    root: PathBuf,
    mounts: Mutex<HashMap<String, usize>>,
}

impl DirectoryImageStore {
    /// Create a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounts: Mutex::new(HashMap::new()),
        }
    }

    /// Number of outstanding mounts of an image.
    #[must_use]
    pub fn mount_count(&self, id: &str) -> usize {
        self.mounts.lock().get(id).copied().unwrap_or(0)
    }

    fn image_id(name: &str) -> String {
        name.chars()
            .map(|c| if matches!(c, '/' | ':' | '@') { '_' } else { c })
            .collect()
    }

    fn rootfs(&self, id: &str) -> PathBuf {
        self.root.join(id).join("rootfs")
    }
}

impl ImageStore for DirectoryImageStore {
    fn lookup_image(&self, name: &str) -> BockResult<ImageHandle> {
        let id = Self::image_id(name);
        if id.is_empty() || id.starts_with('.') || !self.rootfs(&id).is_dir() {
            return Err(BockError::ImageNotFound {
                reference: name.to_string(),
            });
        }
        Ok(ImageHandle {
            id,
            name: name.to_string(),
        })
    }

    fn mount_image(&self, image: &ImageHandle, _mount_label: &str) -> BockResult<PathBuf> {
        let rootfs = self.rootfs(&image.id);
        if !rootfs.is_dir() {
            return Err(BockError::ImageNotFound {
                reference: image.name.clone(),
            });
        }
        *self.mounts.lock().entry(image.id.clone()).or_insert(0) += 1;
        tracing::debug!(image = %image.name, id = %image.id, "Image mounted");
        Ok(rootfs)
    }

    fn unmount_image(&self, id: &str) -> BockResult<()> {
        let mut mounts = self.mounts.lock();
        match mounts.get_mut(id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                mounts.remove(id);
            }
            None => {
                return Err(BockError::Internal {
                    message: format!("image {id} is not mounted"),
                });
            }
        }
        tracing::debug!(id, "Image unmounted");
        Ok(())
    }
}
