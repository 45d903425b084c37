//! strata-mount binary: expose one logical bucket as a FUSE filesystem.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use fuser::MountOption;
use tracing_subscriber::EnvFilter;

use common::{Config, Registry};
use fusefs::S3Fs;

/// Mount a logical bucket as a local filesystem.
///
/// The first configured backend of the bucket is used; objects are
/// decrypted on read and encrypted on flush according to that backend's
/// crypto pipeline.
#[derive(Parser, Debug)]
#[command(name = "strata-mount", version, about)]
struct Args {
    /// Mount point directory.
    #[arg(long)]
    mount: PathBuf,

    /// Logical bucket name (as defined in the config).
    #[arg(long)]
    bucket: String,

    /// Path to the YAML configuration file.
    #[arg(long, default_value = "configs/main.yaml")]
    config: PathBuf,

    /// Gateway access key to validate against the auth list.
    #[arg(long)]
    access_key: Option<String>,

    /// Mount read-only.
    #[arg(long)]
    read_only: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let cfg = Config::load(&args.config)
        .with_context(|| format!("cannot load config from {}", args.config.display()))?;

    match &args.access_key {
        Some(key) => {
            if !cfg.is_valid_access_key(key) {
                bail!("invalid access key: {key}");
            }
            tracing::info!("access key validated");
        }
        None => {
            tracing::warn!("no access key provided; proceeding without authentication validation");
        }
    }

    // Building the registry instantiates every client and pipeline, so bad
    // key material fails here rather than on first use.
    let registry = Registry::from_config(&cfg).context("cannot build bucket registry")?;
    let bucket = registry.get(&args.bucket).with_context(|| {
        format!("bucket '{}' not found in configuration", args.bucket)
    })?;
    let binding = bucket.primary();

    tracing::info!(
        logical = %bucket.name,
        physical = %binding.bucket,
        endpoint = %binding.client.endpoint(),
        encrypted = binding.pipeline.is_some(),
        bindings = bucket.bindings.len(),
        "mounting first backend"
    );

    prepare_mount_point(&args.mount)?;

    let rt = tokio::runtime::Runtime::new().context("cannot start runtime")?;
    rt.block_on(binding.client.bucket_exists(&binding.bucket))
        .with_context(|| format!("bucket validation failed for '{}'", binding.bucket))?;

    let fs = S3Fs::from_binding(rt.handle().clone(), binding, args.read_only);

    let mut options = vec![
        MountOption::FSName("strata".to_string()),
        MountOption::AutoUnmount,
    ];
    if args.read_only {
        options.push(MountOption::RO);
        tracing::info!("mounting read-only");
    } else {
        tracing::info!("mounting read/write; writes upload whole objects on close");
    }

    let unmount_hint = if cfg!(target_os = "macos") {
        format!("umount {}", args.mount.display())
    } else {
        format!("fusermount -u {}", args.mount.display())
    };
    tracing::info!(mount = %args.mount.display(), "mounted; to unmount run: {unmount_hint}");

    fuser::mount2(fs, &args.mount, &options).context("cannot serve filesystem")?;
    Ok(())
}

/// Ensure the mount point exists and is a usable directory.
fn prepare_mount_point(mount: &PathBuf) -> anyhow::Result<()> {
    match std::fs::metadata(mount) {
        Ok(meta) => {
            if !meta.is_dir() {
                bail!("mount point {} is not a directory", mount.display());
            }
            let mut entries = std::fs::read_dir(mount)
                .with_context(|| format!("cannot read mount point {}", mount.display()))?;
            if entries.next().is_some() {
                tracing::warn!(
                    mount = %mount.display(),
                    "mount point is not empty; mounting will hide existing files"
                );
            }
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(mount)
                .with_context(|| format!("cannot create mount point {}", mount.display()))?;
            tracing::info!(mount = %mount.display(), "created mount point");
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("cannot check mount point {}", mount.display()));
        }
    }
    Ok(())
}
