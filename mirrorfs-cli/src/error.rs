//! CLI error types.

use thiserror::Error;

/// Errors surfaced to the user by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid arguments or environment.
    #[error("configuration error: {0}")]
    Config(String),

    /// Logging could not be initialized.
    #[error(transparent)]
    Telemetry(#[from] mirrorfs::telemetry::TelemetryError),

    /// The mount itself failed.
    #[error(transparent)]
    Mount(#[from] mirrorfs::MountError),

    /// The tokio runtime could not be created, or the mounted session
    /// ended with an error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
