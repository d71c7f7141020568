//! Mount command - run the mirror filesystem on a directory.

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;

use mirrorfs::FileSystem;

use crate::error::CliError;

/// Arguments for the mount command.
#[derive(Debug, Args)]
pub struct MountArgs {
    /// Directory to mount the filesystem on
    pub mount_dir: PathBuf,

    /// Directory operations are mirrored to
    pub mirror_dir: PathBuf,

    /// Set log level from 0-4, lower is more verbose
    #[arg(short, long, default_value_t = 2, env = "MIRRORFS_VERBOSITY")]
    pub verbosity: u8,
}

/// Run the mount command. Blocks until the filesystem is unmounted or
/// the process receives SIGINT/SIGTERM.
pub fn run(args: MountArgs) -> Result<(), CliError> {
    mirrorfs::telemetry::init(args.verbosity)?;

    require_directory(&args.mount_dir, "mount")?;
    require_directory(&args.mirror_dir, "mirror")?;

    println!("MirrorFS v{}", mirrorfs::VERSION);
    println!("Mount:  {}", args.mount_dir.display());
    println!("Mirror: {}", args.mirror_dir.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(args))
}

async fn serve(args: MountArgs) -> Result<(), CliError> {
    let fs = FileSystem::new(&args.mount_dir, &args.mirror_dir);
    let mut handle = mirrorfs::mount(fs, &args.mount_dir).await?;

    tokio::select! {
        res = &mut handle => res?,
        _ = shutdown_signal() => {
            info!(mountpoint = %args.mount_dir.display(), "signal received, unmounting");
            handle.unmount().await?;
        }
    }
    info!(mountpoint = %args.mount_dir.display(), "unmounted");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(%err, "failed to install SIGTERM handler");
            // Fall back to Ctrl-C alone.
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

fn require_directory(path: &Path, role: &str) -> Result<(), CliError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(CliError::Config(format!(
            "{} path {} is not a directory",
            role,
            path.display()
        ))),
        Err(_) => Err(CliError::Config(format!(
            "{} directory {} does not exist",
            role,
            path.display()
        ))),
    }
}
