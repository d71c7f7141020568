//! MirrorFS command-line interface.
//!
//! One subcommand: `mount <MOUNT_DIR> <MIRROR_DIR>`. Any other argument
//! count exits non-zero before a mount is attempted.

mod commands;
mod error;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "mirrorfs",
    version,
    about = "Simple FUSE file system that mirrors a directory"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the mirror file system on a directory
    Mount(commands::mount::MountArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Mount(args) => commands::mount::run(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
