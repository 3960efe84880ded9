//! `type=bind` mounts.

use std::path::{Path, PathBuf};

use bock_common::{BockError, BockResult};
use bock_oci::Mount;

use crate::cleanup::{Rollback, SideResource};
use crate::context::MountContext;
use crate::options::{MountOptions, PROPAGATION_MODES, Readability};
use crate::overlay::convert_to_overlay;
use crate::parse::MountArg;
use crate::validate::{eval_in_root, resolve_destination, validate_host_dir};

/// A resolved bind mount and what was acquired for it.
#[derive(Debug)]
pub struct BindMount {
    /// The mount to hand to the runtime.
    pub mount: Mount,
    /// ID of the image mounted for `from=`, to unmount afterwards.
    pub mounted_image: Option<String>,
    /// Overlay directory backing the mount, to remove afterwards.
    pub overlay_dir: Option<PathBuf>,
}

/// Resolve the tokens of a `type=bind` mount.
///
/// Bind mounts are read-only unless `rw` is given. A writable mount, or
/// one whose content comes from an image, is rewritten to point at a
/// copy-on-write overlay so the original content is never modified.
/// Anything acquired here is released again if resolution fails.
///
/// # Errors
///
/// Returns an error for unknown or malformed tokens, a missing target or
/// source, an unknown `from=` image, or a failed overlay setup.
pub fn get_bind_mount(args: &[MountArg], ctx: &MountContext<'_>) -> BockResult<BindMount> {
    let mut options = MountOptions::new();
    let mut source = String::new();
    let mut destination = None;
    let mut from = None;
    let mut non_recursive = false;
    let mut relabeled = false;

    for arg in args {
        match arg.key.as_str() {
            "type" | "consistency" => {}
            "bind-nonrecursive" => {
                options.push("bind");
                non_recursive = true;
            }
            "nosuid" | "nodev" | "noexec" => options.push(arg.key.as_str()),
            "rw" | "readwrite" => options.set_readability(Readability::ReadWrite),
            "ro" | "readonly" => options.set_readability(Readability::ReadOnly),
            "shared" | "rshared" | "private" | "rprivate" | "slave" | "rslave" | "Z" | "z"
            | "U" | "no-dereference" => {
                arg.no_value()?;
                options.push(arg.key.as_str());
            }
            "from" => from = Some(arg.required_value()?.to_string()),
            "bind-propagation" => {
                let mode = arg.required_value()?;
                if !PROPAGATION_MODES.contains(&mode) {
                    return Err(BockError::BadMountOption {
                        option: arg.to_string(),
                    });
                }
                options.push(mode);
            }
            "src" | "source" => source = arg.required_value()?.to_string(),
            "target" | "dst" | "destination" => {
                destination = Some(resolve_destination(arg.required_value()?, ctx.work_dir)?);
            }
            "relabel" => {
                if relabeled {
                    return Err(BockError::BadOptionArgument {
                        option: "relabel (given more than once)".to_string(),
                    });
                }
                relabeled = true;
                match arg.value.as_deref() {
                    Some("private") => options.push("Z"),
                    Some("shared") => options.push("z"),
                    _ => {
                        return Err(BockError::BadMountOption {
                            option: arg.to_string(),
                        });
                    }
                }
            }
            _ => {
                return Err(BockError::BadMountOption {
                    option: arg.key.clone(),
                });
            }
        }
    }

    if options.readability().is_none() {
        options.set_readability(Readability::ReadOnly);
    }

    let mut rollback = Rollback::new(ctx.store, ctx.overlay);
    let mut mounted_image = None;
    let mut from_image = false;
    let mut root = ctx.context_dir.map(Path::to_path_buf);

    if let Some(name) = &from {
        let mount_point = if let Some(stage) = ctx.stage(name) {
            from_image = stage.is_image;
            stage.mount_point.clone()
        } else {
            let image = ctx.store.lookup_image(name)?;
            let mount_point = ctx.store.mount_image(&image, ctx.mount_label)?;
            rollback.push(SideResource::Image(image.id.clone()));
            tracing::debug!(
                image = %image.name,
                mount_point = %mount_point.display(),
                "Mounted image for bind mount"
            );
            mounted_image = Some(image.id);
            from_image = true;
            mount_point
        };
        root = Some(mount_point);
    }

    let destination = destination.ok_or(BockError::MissingDestination)?;

    if !non_recursive {
        options.push("rbind");
    }

    let source = if let Some(root) = &root {
        eval_in_root(root, Path::new(&source))?
    } else {
        if source.is_empty() {
            return Err(BockError::MissingSource);
        }
        validate_host_dir(&source)?;
        PathBuf::from(source)
    };

    let options = options.validate()?;
    let mut mount = Mount::bind(source, destination, options.to_vec());

    let mut overlay_dir = None;
    if from_image || options.is_read_write() {
        let (rewritten, dir) = convert_to_overlay(
            &mount,
            ctx.store,
            ctx.overlay,
            ctx.mount_label,
            ctx.scratch_dir,
            0,
            0,
        )?;
        rollback.push(SideResource::OverlayDir(dir.clone()));
        mount = rewritten;
        overlay_dir = Some(dir);
    }

    tracing::debug!(
        source = %mount.source_path().display(),
        destination = %mount.destination.display(),
        overlay = overlay_dir.is_some(),
        "Resolved bind mount"
    );

    // Ownership passes to the caller through the returned fields.
    let _ = rollback.commit();
    Ok(BindMount {
        mount,
        mounted_image,
        overlay_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;

    use tempfile::tempdir;

    use crate::config::MountConfig;
    use crate::overlay::{OverlayDriver, OverlayOptions};
    use crate::parse::ParsedMount;
    use crate::store::{ImageHandle, ImageStore, StageMount, StageMounts};

    /// Records image mounts and mirrors overlays by returning the lower
    /// directory as the merged view. With `fail_mount` set, every overlay
    /// mount fails after its directory was allocated.
    #[derive(Default)]
    struct Fake {
        image_root: PathBuf,
        mounted: RefCell<Vec<String>>,
        overlays: RefCell<Vec<PathBuf>>,
        fail_mount: bool,
    }

    impl ImageStore for Fake {
        fn lookup_image(&self, name: &str) -> BockResult<ImageHandle> {
            if name == "missing" {
                return Err(BockError::ImageNotFound {
                    reference: name.to_string(),
                });
            }
            Ok(ImageHandle {
                id: format!("id-{name}"),
                name: name.to_string(),
            })
        }

        fn mount_image(&self, image: &ImageHandle, _label: &str) -> BockResult<PathBuf> {
            self.mounted.borrow_mut().push(image.id.clone());
            Ok(self.image_root.clone())
        }

        fn unmount_image(&self, id: &str) -> BockResult<()> {
            self.mounted.borrow_mut().retain(|m| m != id);
            Ok(())
        }
    }

    impl OverlayDriver for Fake {
        fn temp_dir(&self, scratch: &Path, _uid: u32, _gid: u32) -> BockResult<PathBuf> {
            let dir = scratch.join(format!("o{}", self.overlays.borrow().len()));
            fs::create_dir_all(&dir)?;
            self.overlays.borrow_mut().push(dir.clone());
            Ok(dir)
        }

        fn mount(
            &self,
            _dir: &Path,
            lower: &Path,
            destination: &Path,
            _options: &OverlayOptions,
        ) -> BockResult<Mount> {
            if self.fail_mount {
                return Err(BockError::Overlay {
                    path: destination.display().to_string(),
                    message: "mount refused".to_string(),
                });
            }
            Ok(Mount::bind(lower, destination, Vec::new()))
        }

        fn remove_temp(&self, dir: &Path) -> BockResult<()> {
            self.overlays.borrow_mut().retain(|d| d != dir);
            Ok(())
        }
    }

    fn args(spec: &str) -> Vec<MountArg> {
        ParsedMount::parse(spec).unwrap().args
    }

    #[test]
    fn read_only_by_default() {
        let context = tempdir().unwrap();
        fs::create_dir(context.path().join("src")).unwrap();
        let fake = Fake::default();
        let config = MountConfig::default();
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/"), context.path())
            .with_context_dir(context.path());

        let bind = get_bind_mount(&args("type=bind,source=src,target=/data"), &ctx).unwrap();
        assert_eq!(bind.mount.options, vec!["ro", "rbind"]);
        assert_eq!(bind.mount.source_path(), context.path().join("src"));
        assert_eq!(bind.mount.destination, PathBuf::from("/data"));
        assert!(bind.overlay_dir.is_none());
        assert!(bind.mounted_image.is_none());
    }

    #[test]
    fn writable_goes_through_overlay() {
        let context = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        fs::create_dir(context.path().join("src")).unwrap();
        let fake = Fake::default();
        let config = MountConfig::default();
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/work"), scratch.path())
            .with_context_dir(context.path());

        let bind = get_bind_mount(&args("type=bind,src=src,dst=out,rw,nosuid"), &ctx).unwrap();
        assert_eq!(bind.mount.options, vec!["rw", "nosuid", "rbind"]);
        assert_eq!(bind.mount.destination, PathBuf::from("/work/out"));
        assert!(bind.overlay_dir.is_some());
        assert_eq!(fake.overlays.borrow().len(), 1);
    }

    #[test]
    fn nonrecursive_and_relabel() {
        let context = tempdir().unwrap();
        let fake = Fake::default();
        let config = MountConfig::default();
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/"), context.path())
            .with_context_dir(context.path());

        let bind = get_bind_mount(
            &args("type=bind,target=/x,bind-nonrecursive,relabel=shared,bind-propagation=rslave"),
            &ctx,
        )
        .unwrap();
        assert_eq!(bind.mount.options, vec!["ro", "bind", "z", "rslave"]);
    }

    #[test]
    fn rejects_bad_tokens() {
        let fake = Fake::default();
        let config = MountConfig::default();
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/"), Path::new("/tmp"));

        let cases = [
            ("type=bind,target=/x,relabel=bogus", "relabel=bogus"),
            ("type=bind,target=/x,bind-propagation=sideways", "bind-propagation=sideways"),
            ("type=bind,target=/x,tmpfs-size=1m", "tmpfs-size"),
        ];
        for (spec, option) in cases {
            match get_bind_mount(&args(spec), &ctx).unwrap_err() {
                BockError::BadMountOption { option: got } => assert_eq!(got, option),
                other => panic!("unexpected error for {spec}: {other}"),
            }
        }

        let err =
            get_bind_mount(&args("type=bind,target=/x,relabel=shared,relabel=private"), &ctx)
                .unwrap_err();
        assert!(matches!(err, BockError::BadOptionArgument { .. }));

        let err = get_bind_mount(&args("type=bind,target=/x,Z=1"), &ctx).unwrap_err();
        assert!(matches!(err, BockError::BadOptionArgument { .. }));
    }

    #[test]
    fn host_source_required_without_context() {
        let fake = Fake::default();
        let config = MountConfig::default();
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/"), Path::new("/tmp"));

        let err = get_bind_mount(&args("type=bind,target=/x"), &ctx).unwrap_err();
        assert!(matches!(err, BockError::MissingSource));

        let err = get_bind_mount(&args("type=bind,source=/x"), &ctx).unwrap_err();
        assert!(matches!(err, BockError::MissingDestination));
    }

    #[test]
    fn image_source_is_overlaid_and_released_on_failure() {
        let image = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        fs::create_dir(image.path().join("etc")).unwrap();
        let fake = Fake {
            image_root: image.path().to_path_buf(),
            ..Fake::default()
        };
        let config = MountConfig::default();
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/"), scratch.path());

        let bind = get_bind_mount(&args("type=bind,from=alpine,src=/etc,target=/etc"), &ctx)
            .unwrap();
        assert_eq!(bind.mounted_image.as_deref(), Some("id-alpine"));
        assert!(bind.overlay_dir.is_some());
        assert_eq!(bind.mount.options, vec!["ro", "rbind"]);

        // No target: the image mounted for `from=` is released again.
        let err = get_bind_mount(&args("type=bind,from=busybox,src=/etc"), &ctx).unwrap_err();
        assert!(matches!(err, BockError::MissingDestination));
        assert_eq!(*fake.mounted.borrow(), vec!["id-alpine"]);

        let err = get_bind_mount(&args("type=bind,from=missing,target=/x"), &ctx).unwrap_err();
        assert!(matches!(err, BockError::ImageNotFound { .. }));
    }

    #[test]
    fn failed_overlay_releases_image_and_dir() {
        let image = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        fs::create_dir(image.path().join("etc")).unwrap();
        let fake = Fake {
            image_root: image.path().to_path_buf(),
            fail_mount: true,
            ..Fake::default()
        };
        let config = MountConfig::default();
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/"), scratch.path());

        let err = get_bind_mount(&args("type=bind,from=alpine,src=/etc,target=/etc,rw"), &ctx)
            .unwrap_err();
        assert!(matches!(err, BockError::Overlay { .. }));
        assert!(fake.mounted.borrow().is_empty());
        assert!(fake.overlays.borrow().is_empty());
        // The directory was allocated before the mount failed.
        assert!(scratch.path().join("o0").exists());
    }

    #[test]
    fn stage_source_is_not_remounted() {
        let stage = tempdir().unwrap();
        fs::create_dir(stage.path().join("out")).unwrap();
        let fake = Fake::default();
        let config = MountConfig::default();
        let mut stages = StageMounts::new();
        stages.insert("builder".to_string(), StageMount::stage(stage.path()));
        let ctx = MountContext::new(&fake, &fake, &config, Path::new("/"), Path::new("/tmp"))
            .with_stage_mounts(&stages);

        let bind =
            get_bind_mount(&args("type=bind,from=builder,src=out,target=/out"), &ctx).unwrap();
        assert_eq!(bind.mount.source_path(), stage.path().join("out"));
        assert!(bind.mounted_image.is_none());
        assert!(bind.overlay_dir.is_none());
        assert!(fake.mounted.borrow().is_empty());
    }
}
