//! Logging setup.
//!
//! The subscriber is installed once, by the binary, from the CLI
//! verbosity; the library itself only emits `tracing` events and never
//! touches global logging state elsewhere.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Install a formatting subscriber at the given verbosity.
///
/// Verbosity runs 0-4, lower is more verbose: 0 = trace, 1 = debug,
/// 2 = info (the default), 3 = warn, 4 and above = error.
pub fn init(verbosity: u8) -> Result<(), TelemetryError> {
    let filter = EnvFilter::new(level_for(verbosity));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| TelemetryError::Init(err.to_string()))
}

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "trace",
        1 => "debug",
        2 => "info",
        3 => "warn",
        _ => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping_lower_is_more_verbose() {
        assert_eq!(level_for(0), "trace");
        assert_eq!(level_for(2), "info");
        assert_eq!(level_for(4), "error");
        assert_eq!(level_for(200), "error");
    }
}
