//! # bock-mounts
//!
//! Resolution of the `--volume` and `--mount` specifications of a Bock
//! build step into OCI runtime mounts.
//!
//! Three mount types are understood:
//! - `bind`: host or build-context directories, images, and stages;
//!   writable and image-backed mounts go through a copy-on-write overlay
//! - `cache`: persistent per-user cache directories, optionally locked
//! - `tmpfs`: in-memory filesystems
//!
//! Resolution is all-or-nothing. [`get_volumes`] either returns every
//! mount together with the [`SideResources`] to release after the step,
//! or releases whatever it acquired and reports the first failure.

#![warn(missing_docs)]

pub mod bind;
pub mod cache;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod context;
pub mod fsutil;
pub mod lock;
pub mod options;
pub mod overlay;
pub mod parse;
pub mod resolve;
pub mod selinux;
pub mod store;
pub mod tmpfs;
pub mod validate;
pub mod volume;

pub use bind::{BindMount, get_bind_mount};
pub use cache::{CacheMount, Sharing, cache_dir, cache_dir_id, get_cache_mount};
pub use cleanup::{Rollback, SideResource, SideResources};
pub use config::MountConfig;
pub use context::MountContext;
pub use lock::CacheLock;
pub use overlay::{KernelOverlay, OverlayDriver, OverlayOptions, convert_to_overlay};
pub use parse::{MountArg, MountKind, ParsedMount};
pub use resolve::{MountPlan, get_volumes};
pub use selinux::SelinuxMode;
pub use store::{DirectoryImageStore, ImageHandle, ImageStore, StageMount, StageMounts};
pub use tmpfs::get_tmpfs_mount;
pub use volume::parse_volume;
