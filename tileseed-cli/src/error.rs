//! CLI error handling with user-friendly messages.
//!
//! Centralizes error reporting for the CLI so every command prints errors
//! the same way and exits with a consistent code.

use std::fmt;
use std::path::PathBuf;
use std::process;

use tileseed::SchemeError;

/// Exit code for a job that finished with failed tiles.
pub const EXIT_TILES_FAILED: i32 = 2;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration or argument error
    Config(String),
    /// Scheme construction, restore or checkpoint failure
    Scheme(SchemeError),
    /// Failed to open or write the tile list
    Output { path: PathBuf, error: std::io::Error },
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// The job finished but some tiles failed
    TilesFailed { failed: u64, total: u64 },
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::TilesFailed { .. } => EXIT_TILES_FAILED,
            _ => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Scheme(SchemeError::ManifestChanged { .. }) => {
                eprintln!();
                eprintln!("The manifest was modified after the checkpoint was written.");
                eprintln!("Restore the original manifest or start a new export.");
            }
            CliError::Scheme(SchemeError::Checkpoint(_) | SchemeError::InvalidCheckpoint(_)) => {
                eprintln!();
                eprintln!("The checkpoint file is incomplete or was written by another tool.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Scheme(e) => write!(f, "{}", e),
            CliError::Output { path, error } => {
                write!(f, "Failed to write '{}': {}", path.display(), error)
            }
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::TilesFailed { failed, total } => {
                write!(f, "{} of {} tiles failed", failed, total)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Scheme(e) => Some(e),
            CliError::Output { error, .. } => Some(error),
            CliError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchemeError> for CliError {
    fn from(e: SchemeError) -> Self {
        CliError::Scheme(e)
    }
}
