//! Resolution of all mounts requested for one build step.

use std::collections::HashSet;
use std::path::PathBuf;

use bock_common::{BockError, BockResult};
use bock_oci::Mount;

use crate::bind::get_bind_mount;
use crate::cache::get_cache_mount;
use crate::cleanup::{Rollback, SideResource, SideResources};
use crate::context::MountContext;
use crate::parse::{MountKind, ParsedMount};
use crate::tmpfs::get_tmpfs_mount;
use crate::volume::parse_volume;

/// The mounts for a build step and what must be released after it ran.
#[derive(Debug, Default)]
pub struct MountPlan {
    /// `--mount` entries in input order, followed by `--volume` entries.
    pub mounts: Vec<Mount>,
    /// Images, overlays, and locks held for the mounts.
    pub resources: SideResources,
}

/// Accumulates mounts while rejecting repeated destinations.
#[derive(Default)]
struct Destinations {
    seen: HashSet<PathBuf>,
    mounts: Vec<Mount>,
}

impl Destinations {
    fn insert(&mut self, mount: Mount) -> BockResult<()> {
        if !self.seen.insert(mount.destination.clone()) {
            return Err(BockError::DuplicateDestination {
                destination: mount.destination.display().to_string(),
            });
        }
        self.mounts.push(mount);
        Ok(())
    }
}

/// Resolve one `--mount` string, handing its side resources to `rollback`.
///
/// `held_locks` collects the cache lock files taken so far in the batch.
fn resolve_mount(
    spec: &str,
    ctx: &MountContext<'_>,
    rollback: &mut Rollback<'_>,
    held_locks: &mut HashSet<PathBuf>,
) -> BockResult<Mount> {
    let parsed = ParsedMount::parse(spec)?;
    match parsed.kind {
        MountKind::Bind => {
            let bind = get_bind_mount(&parsed.args, ctx)?;
            if let Some(id) = bind.mounted_image {
                rollback.push(SideResource::Image(id));
            }
            if let Some(dir) = bind.overlay_dir {
                rollback.push(SideResource::OverlayDir(dir));
            }
            Ok(bind.mount)
        }
        MountKind::Cache => {
            let cache = get_cache_mount(&parsed.args, ctx, held_locks)?;
            if let Some(lock) = cache.lock {
                held_locks.insert(lock.path().to_path_buf());
                rollback.push(SideResource::Lock(lock));
            }
            Ok(cache.mount)
        }
        MountKind::Tmpfs => get_tmpfs_mount(&parsed.args, ctx.work_dir),
    }
}

/// Resolve every `--volume` and `--mount` of a build step.
///
/// Either every mount resolves and the plan owns everything acquired, or
/// the first failure is returned, tagged with the offending string, and
/// everything acquired so far has been released again. No two mounts may
/// share a destination. Locked cache mounts that share an entry hold its
/// lock once.
///
/// # Errors
///
/// Returns [`BockError::Mount`] wrapping the first resolution failure.
pub fn get_volumes(
    ctx: &MountContext<'_>,
    volumes: &[String],
    mounts: &[String],
) -> BockResult<MountPlan> {
    let mut rollback = Rollback::new(ctx.store, ctx.overlay);
    let mut destinations = Destinations::default();
    let mut held_locks = HashSet::new();

    for spec in mounts {
        resolve_mount(spec, ctx, &mut rollback, &mut held_locks)
            .and_then(|mount| destinations.insert(mount))
            .map_err(|e| e.for_spec(spec))?;
    }

    for spec in volumes {
        parse_volume(spec)
            .and_then(|mount| destinations.insert(mount))
            .map_err(|e| e.for_spec(spec))?;
    }

    let resources = rollback.commit();
    tracing::info!(
        mounts = destinations.mounts.len(),
        images = resources.mounted_images.len(),
        overlays = resources.overlay_dirs.len(),
        locks = resources.locks.len(),
        "Resolved build step mounts"
    );
    Ok(MountPlan {
        mounts: destinations.mounts,
        resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use tempfile::tempdir;

    use crate::config::MountConfig;
    use crate::overlay::KernelOverlay;
    use crate::store::DirectoryImageStore;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn mounts_then_volumes() {
        let tmp = tempdir().unwrap();
        let config = MountConfig::default()
            .with_tmp_dir(tmp.path())
            .with_rootless_uid(rustix::process::geteuid().as_raw());
        let store = DirectoryImageStore::new(tmp.path());
        let ctx = MountContext::new(&store, &KernelOverlay, &config, Path::new("/"), tmp.path());

        let plan = get_volumes(
            &ctx,
            &strings(&["vol:/v"]),
            &strings(&["type=tmpfs,target=/t", "type=cache,target=/c"]),
        )
        .unwrap();
        let destinations: Vec<_> = plan.mounts.iter().map(|m| m.destination.clone()).collect();
        assert_eq!(
            destinations,
            vec![PathBuf::from("/t"), PathBuf::from("/c"), PathBuf::from("/v")]
        );
        assert!(plan.resources.is_empty());
    }

    #[test]
    fn duplicate_destination_is_tagged() {
        let tmp = tempdir().unwrap();
        let config = MountConfig::default().with_tmp_dir(tmp.path());
        let store = DirectoryImageStore::new(tmp.path());
        let ctx = MountContext::new(&store, &KernelOverlay, &config, Path::new("/"), tmp.path());

        let err = get_volumes(&ctx, &strings(&["vol:/t"]), &strings(&["type=tmpfs,target=/t"]))
            .unwrap_err();
        match &err {
            BockError::Mount { spec, .. } => assert_eq!(spec, "vol:/t"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root(), BockError::DuplicateDestination { .. }));
    }

    #[test]
    fn malformed_mount_is_tagged() {
        let tmp = tempdir().unwrap();
        let config = MountConfig::default().with_tmp_dir(tmp.path());
        let store = DirectoryImageStore::new(tmp.path());
        let ctx = MountContext::new(&store, &KernelOverlay, &config, Path::new("/"), tmp.path());

        let err = get_volumes(&ctx, &[], &strings(&["type=tmpfs"])).unwrap_err();
        assert!(err.to_string().starts_with("type=tmpfs: "));
        assert!(matches!(err.root(), BockError::MalformedSpec { .. }));
    }
}
