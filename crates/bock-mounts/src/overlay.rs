//! Copy-on-write overlays for build-step mounts.
//!
//! A bind mount that is writable, or whose content comes from an image,
//! is not exposed directly. Its source becomes the lower layer of an
//! overlay with a throwaway upper layer, and the mount points at the
//! merged view instead.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use bock_common::{BockError, BockResult};
use bock_oci::Mount;

use crate::cleanup::{Rollback, SideResource};
use crate::fsutil;
use crate::store::ImageStore;

/// Options handed to the overlay driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayOptions {
    /// Storage driver options (`overlay.mountopt=...` entries are honoured).
    pub graph_options: Vec<String>,
    /// SELinux label for the merged view; empty for none.
    pub mount_label: String,
}

/// The overlay filesystem primitive.
pub trait OverlayDriver {
    /// Allocate a fresh overlay directory under `scratch` with `upper`,
    /// `work`, and `merge` children, the first two owned by `uid:gid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    fn temp_dir(&self, scratch: &Path, uid: u32, gid: u32) -> BockResult<PathBuf>;

    /// Mount `lower` under the upper layer of `overlay_dir` and return a
    /// bind mount of the merged view at `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if the overlay cannot be mounted.
    fn mount(
        &self,
        overlay_dir: &Path,
        lower: &Path,
        destination: &Path,
        options: &OverlayOptions,
    ) -> BockResult<Mount>;

    /// Unmount the merged view, if mounted, and delete `overlay_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount or removal fails.
    fn remove_temp(&self, overlay_dir: &Path) -> BockResult<()>;
}

/// Overlay driver backed by the kernel's overlayfs.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelOverlay;

impl KernelOverlay {
    /// Build the overlayfs mount data string.
    ///
    /// # Errors
    ///
    /// Returns an error if a layer path contains a comma, which mount data
    /// cannot express.
    pub fn mount_data(
        overlay_dir: &Path,
        lower: &Path,
        options: &OverlayOptions,
    ) -> BockResult<String> {
        let layer = |path: &Path| -> BockResult<String> {
            let display = path.display().to_string();
            if display.contains(',') {
                return Err(BockError::Overlay {
                    path: display,
                    message: "path contains a comma".to_string(),
                });
            }
            Ok(display.replace(':', "\\:"))
        };

        let mut data = format!(
            "lowerdir={},upperdir={},workdir={}",
            layer(lower)?,
            layer(&overlay_dir.join("upper"))?,
            layer(&overlay_dir.join("work"))?
        );
        for extra in options
            .graph_options
            .iter()
            .filter_map(|o| o.strip_prefix("overlay.mountopt="))
        {
            data.push(',');
            data.push_str(extra);
        }
        if !options.mount_label.is_empty() {
            let _ = write!(data, ",context=\"{}\"", options.mount_label);
        }
        Ok(data)
    }
}

impl OverlayDriver for KernelOverlay {
    fn temp_dir(&self, scratch: &Path, uid: u32, gid: u32) -> BockResult<PathBuf> {
        let base = scratch.join("overlay");
        fsutil::create_dir_all_mode(&base, 0o700)?;

        let dir = base.join(format!("overlay-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir(&dir)?;
        remove_on_error(&dir, |dir| {
            for layer in ["upper", "work"] {
                fsutil::create_dir_owned(&dir.join(layer), 0o755, uid, gid)?;
            }
            fs::create_dir(dir.join("merge"))
        })?;

        tracing::debug!(dir = %dir.display(), "Overlay directory allocated");
        Ok(dir)
    }

    fn mount(
        &self,
        overlay_dir: &Path,
        lower: &Path,
        destination: &Path,
        options: &OverlayOptions,
    ) -> BockResult<Mount> {
        let merged = overlay_dir.join("merge");
        let data = Self::mount_data(overlay_dir, lower, options)?;

        tracing::debug!(
            merged = %merged.display(),
            options = %data,
            "Mounting overlayfs"
        );
        sys::mount_overlay(&merged, &data).map_err(|e| BockError::Overlay {
            path: lower.display().to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(
            lower = %lower.display(),
            merged = %merged.display(),
            "OverlayFS mounted successfully"
        );
        Ok(Mount::bind(merged, destination, Vec::new()))
    }

    fn remove_temp(&self, overlay_dir: &Path) -> BockResult<()> {
        let merged = overlay_dir.join("merge");
        if is_mount_point(&merged, overlay_dir) {
            sys::unmount_detach(&merged)?;
        }
        match fs::remove_dir_all(overlay_dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        tracing::debug!(dir = %overlay_dir.display(), "Overlay directory removed");
        Ok(())
    }
}

/// Run `populate` on a freshly created `dir`, deleting `dir` if it fails.
fn remove_on_error(
    dir: &Path,
    populate: impl FnOnce(&Path) -> std::io::Result<()>,
) -> std::io::Result<()> {
    populate(dir).inspect_err(|_| {
        if let Err(e) = fs::remove_dir_all(dir) {
            tracing::debug!(dir = %dir.display(), error = %e, "Removing partial overlay failed");
        }
    })
}

/// A directory on a different device than its parent is a mount point.
fn is_mount_point(path: &Path, parent: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (fs::metadata(path), fs::metadata(parent)) {
        (Ok(inner), Ok(outer)) => inner.dev() != outer.dev(),
        _ => false,
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::ffi::CString;
    use std::io;
    use std::path::Path;

    use rustix::io::Errno;
    use rustix::mount::{MountFlags, UnmountFlags, mount, unmount};

    pub fn mount_overlay(merged: &Path, data: &str) -> io::Result<()> {
        let data =
            CString::new(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        mount("overlay", merged, "overlay", MountFlags::empty(), data.as_c_str())?;
        Ok(())
    }

    pub fn unmount_detach(merged: &Path) -> io::Result<()> {
        match unmount(merged, UnmountFlags::DETACH) {
            Ok(()) => Ok(()),
            // Not a mount point, or already gone.
            Err(e) if e == Errno::INVAL || e == Errno::NOENT => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::path::Path;

    pub fn mount_overlay(_merged: &Path, _data: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "overlayfs requires Linux"))
    }

    pub fn unmount_detach(_merged: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Rewrite `mount` to point at an overlay of its source.
///
/// Directories become the lower layer directly. For anything else the
/// parent directory is overlaid instead and the returned source is the
/// same-named entry inside the merged view. The overlay directory is
/// returned for the caller to remove; on failure it has already been
/// removed.
///
/// # Errors
///
/// Returns an error if the source cannot be inspected or the overlay
/// cannot be set up.
pub fn convert_to_overlay(
    mount: &Mount,
    store: &dyn ImageStore,
    driver: &dyn OverlayDriver,
    mount_label: &str,
    scratch: &Path,
    uid: u32,
    gid: u32,
) -> BockResult<(Mount, PathBuf)> {
    let destination = mount.destination.display().to_string();
    let overlay_dir = driver
        .temp_dir(scratch, uid, gid)
        .map_err(|e| BockError::Overlay {
            path: destination.clone(),
            message: e.to_string(),
        })?;

    let mut rollback = Rollback::new(store, driver);
    rollback.push(SideResource::OverlayDir(overlay_dir.clone()));

    let options = OverlayOptions {
        graph_options: store.graph_options(),
        mount_label: mount_label.to_string(),
    };
    let source = mount.source_path();
    let meta = fs::metadata(source).map_err(|e| BockError::Overlay {
        path: source.display().to_string(),
        message: e.to_string(),
    })?;

    let rewritten = if meta.is_dir() {
        let mounted = driver.mount(&overlay_dir, source, &mount.destination, &options)?;
        Mount {
            options: mount.options.clone(),
            ..mounted
        }
    } else {
        // Overlayfs needs a directory as its lower layer.
        let (Some(parent), Some(name)) = (source.parent(), source.file_name()) else {
            return Err(BockError::Overlay {
                path: source.display().to_string(),
                message: "source has no parent directory".to_string(),
            });
        };
        let mounted = driver.mount(&overlay_dir, parent, &mount.destination, &options)?;
        if !mounted.is_bind() {
            return Err(BockError::Overlay {
                path: mounted.source_path().display().to_string(),
                message: format!("cannot bind a single entry into {destination}"),
            });
        }
        Mount {
            destination: mount.destination.clone(),
            mount_type: mounted.mount_type.clone(),
            source: Some(mounted.source_path().join(name)),
            options: mount.options.clone(),
        }
    };

    // The caller owns the overlay directory from here on.
    let _ = rollback.commit();
    Ok((rewritten, overlay_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use crate::store::ImageHandle;

    /// Allocates real directories, refuses every mount, and records which
    /// directories were handed back.
    #[derive(Default)]
    struct RefusingOverlay {
        allocated: RefCell<Vec<PathBuf>>,
        removed: RefCell<Vec<PathBuf>>,
    }

    impl ImageStore for RefusingOverlay {
        fn lookup_image(&self, name: &str) -> BockResult<ImageHandle> {
            Err(BockError::ImageNotFound {
                reference: name.to_string(),
            })
        }

        fn mount_image(&self, image: &ImageHandle, _label: &str) -> BockResult<PathBuf> {
            Err(BockError::ImageNotFound {
                reference: image.name.clone(),
            })
        }

        fn unmount_image(&self, _id: &str) -> BockResult<()> {
            Ok(())
        }
    }

    impl OverlayDriver for RefusingOverlay {
        fn temp_dir(&self, scratch: &Path, _uid: u32, _gid: u32) -> BockResult<PathBuf> {
            let dir = scratch.join(format!("o{}", self.allocated.borrow().len()));
            fs::create_dir(&dir)?;
            self.allocated.borrow_mut().push(dir.clone());
            Ok(dir)
        }

        fn mount(
            &self,
            _dir: &Path,
            _lower: &Path,
            destination: &Path,
            _options: &OverlayOptions,
        ) -> BockResult<Mount> {
            Err(BockError::Overlay {
                path: destination.display().to_string(),
                message: "mount refused".to_string(),
            })
        }

        fn remove_temp(&self, dir: &Path) -> BockResult<()> {
            self.removed.borrow_mut().push(dir.to_path_buf());
            Ok(())
        }
    }

    #[test]
    fn failed_mount_returns_the_directory() {
        let lower = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        fs::write(lower.path().join("app.toml"), "").unwrap();
        let driver = RefusingOverlay::default();

        for source in [lower.path().to_path_buf(), lower.path().join("app.toml")] {
            let mount = Mount::bind(source, "/data", vec!["rw".to_string()]);
            let err = convert_to_overlay(&mount, &driver, &driver, "", scratch.path(), 0, 0)
                .unwrap_err();
            assert!(matches!(err, BockError::Overlay { .. }));
        }
        assert_eq!(driver.allocated.borrow().len(), 2);
        assert_eq!(*driver.removed.borrow(), *driver.allocated.borrow());
    }

    #[test]
    fn partial_overlay_dir_is_removed() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("overlay-partial");
        fs::create_dir(&dir).unwrap();

        let err = remove_on_error(&dir, |dir| {
            fs::create_dir(dir.join("upper"))?;
            Err(std::io::Error::other("work"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "work");
        assert!(!dir.exists());

        let kept = scratch.path().join("overlay-whole");
        fs::create_dir(&kept).unwrap();
        remove_on_error(&kept, |dir| fs::create_dir(dir.join("merge"))).unwrap();
        assert!(kept.join("merge").is_dir());
    }

    #[test]
    fn mount_data_layout() {
        let options = OverlayOptions {
            graph_options: vec![
                "overlay.mountopt=nodev,metacopy=on".to_string(),
                "overlay.size=10G".to_string(),
            ],
            mount_label: "system_u:object_r:container_file_t:s0".to_string(),
        };
        let data =
            KernelOverlay::mount_data(Path::new("/scratch/o1"), Path::new("/ctx/a:b"), &options)
                .unwrap();
        assert_eq!(
            data,
            "lowerdir=/ctx/a\\:b,upperdir=/scratch/o1/upper,workdir=/scratch/o1/work,\
             nodev,metacopy=on,context=\"system_u:object_r:container_file_t:s0\""
        );
    }

    #[test]
    fn mount_data_rejects_commas() {
        let err = KernelOverlay::mount_data(
            Path::new("/scratch/o1"),
            Path::new("/ctx/a,b"),
            &OverlayOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BockError::Overlay { .. }));
    }

    #[test]
    fn temp_dirs_are_unique() {
        let scratch = tempfile::tempdir().unwrap();
        let uid = rustix::process::geteuid().as_raw();
        let gid = rustix::process::getegid().as_raw();
        let driver = KernelOverlay;

        let first = driver.temp_dir(scratch.path(), uid, gid).unwrap();
        let second = driver.temp_dir(scratch.path(), uid, gid).unwrap();
        assert_ne!(first, second);
        for child in ["upper", "work", "merge"] {
            assert!(first.join(child).is_dir());
        }

        driver.remove_temp(&first).unwrap();
        assert!(!first.exists());
        assert!(second.exists());
    }
}
