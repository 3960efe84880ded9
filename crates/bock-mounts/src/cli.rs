//! Bock mount resolver CLI.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use serde::Serialize;

use bock_common::BockPaths;
use bock_oci::Mount;

use crate::cache::cache_dir;
use crate::config::MountConfig;
use crate::context::MountContext;
use crate::overlay::KernelOverlay;
use crate::resolve::get_volumes;
use crate::store::{DirectoryImageStore, StageMount, StageMounts};
use crate::validate::resolve_destination;

/// Bock Mounts - resolve build-step volumes and mounts
#[derive(Parser)]
#[command(name = "bock-mounts")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "BOCK_MOUNTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Bock mounts commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve mounts, print them as JSON, and release them again
    Resolve {
        /// Legacy volume (host-dir:ctr-dir[:options])
        #[arg(short = 'v', long = "volume")]
        volumes: Vec<String>,

        /// Mount (type=<bind|cache|tmpfs>,target=<ctr-dir>[,options])
        #[arg(long = "mount")]
        mounts: Vec<String>,

        /// Build context directory that sources resolve inside
        #[arg(long)]
        context: Option<PathBuf>,

        /// Container working directory for relative targets
        #[arg(long, default_value = "/")]
        workdir: PathBuf,

        /// Scratch directory for overlays
        #[arg(long)]
        scratch: Option<PathBuf>,

        /// SELinux mount label
        #[arg(long, default_value = "")]
        label: String,

        /// Image store root
        #[arg(long)]
        images: Option<PathBuf>,

        /// Named stage available to from= (NAME=DIR)
        #[arg(long = "stage")]
        stages: Vec<String>,
    },

    /// Print the host directory of a cache entry
    CacheDir {
        /// Cache ID
        #[arg(long, conflicts_with = "target", required_unless_present = "target")]
        id: Option<String>,

        /// Cache target, used when no ID is given
        #[arg(long)]
        target: Option<String>,
    },
}

/// JSON form of a resolved plan.
#[derive(Serialize)]
struct PlanReport<'a> {
    mounts: &'a [Mount],
    mounted_images: &'a [String],
    overlay_dirs: &'a [PathBuf],
    locks: Vec<&'a Path>,
}

fn parse_stage(stage: &str) -> Result<(String, StageMount)> {
    let (name, dir) = stage
        .split_once('=')
        .ok_or_else(|| eyre!("Invalid stage '{stage}'. Expected NAME=DIR"))?;
    Ok((name.to_string(), StageMount::stage(dir)))
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or the command
    /// fails.
    pub fn execute(self) -> Result<()> {
        let config = match &self.config {
            Some(path) => MountConfig::from_file(path)?,
            None => MountConfig::from_env(),
        };
        tracing::debug!(?config, "Loaded configuration");

        match self.command {
            Commands::Resolve {
                volumes,
                mounts,
                context,
                workdir,
                scratch,
                label,
                images,
                stages,
            } => {
                let paths = BockPaths::new();
                let store = DirectoryImageStore::new(images.unwrap_or_else(|| paths.images()));
                let scratch = scratch.unwrap_or_else(|| paths.scratch());
                let stages = stages
                    .iter()
                    .map(|stage| parse_stage(stage))
                    .collect::<Result<StageMounts>>()?;

                let mut ctx = MountContext::new(&store, &KernelOverlay, &config, &workdir, &scratch)
                    .with_mount_label(&label)
                    .with_stage_mounts(&stages);
                if let Some(context) = &context {
                    ctx = ctx.with_context_dir(context);
                }

                tracing::info!(
                    volumes = volumes.len(),
                    mounts = mounts.len(),
                    "Resolving mounts"
                );
                let plan = get_volumes(&ctx, &volumes, &mounts)?;

                let report = PlanReport {
                    mounts: &plan.mounts,
                    mounted_images: &plan.resources.mounted_images,
                    overlay_dirs: &plan.resources.overlay_dirs,
                    locks: plan.resources.locks.iter().map(|lock| lock.path()).collect(),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);

                plan.resources.release(&store, &KernelOverlay);
                Ok(())
            }

            Commands::CacheDir { id, target } => {
                let key = match (id, target) {
                    (Some(id), _) => id,
                    (None, Some(target)) => resolve_destination(&target, Path::new("/"))?
                        .display()
                        .to_string(),
                    (None, None) => return Err(eyre!("Either --id or --target is required")),
                };
                println!("{}", cache_dir(&config, &key).display());
                Ok(())
            }
        }
    }
}
