//! Tileseed CLI - Command-line interface
//!
//! Plans, exports and resumes tile generation jobs described by a JSON
//! job config.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tileseed::logging::{init_logging, DEFAULT_LOG_DIR, DEFAULT_LOG_FILE};

use commands::{export, plan, resume};
use error::CliError;

#[derive(Parser)]
#[command(name = "tileseed")]
#[command(version, about = "Resumable tile pyramid generation", long_about = None)]
struct Cli {
    /// Directory for the session log
    #[arg(long, global = true, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the tile ranges and totals a job would cover
    Plan {
        /// Job config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Source metadata (TileJSON) restricting zooms and bounds
        #[arg(long)]
        source_info: Option<PathBuf>,
    },

    /// Run a job, writing every tile to a manifest
    Export {
        /// Job config (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Manifest to write
        #[arg(long)]
        output: PathBuf,

        /// Source metadata (TileJSON) restricting zooms and bounds
        #[arg(long)]
        source_info: Option<PathBuf>,

        /// Where to write the checkpoint on Ctrl+C [default: tileseed.checkpoint.json]
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Write JSON records instead of z/x/y lines
        #[arg(long)]
        records: bool,
    },

    /// Continue a paused export from its checkpoint
    Resume {
        /// Checkpoint to restore [default: tileseed.checkpoint.json]
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Manifest to append to
        #[arg(long)]
        output: PathBuf,

        /// Write JSON records instead of z/x/y lines
        #[arg(long)]
        records: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let _guard = match init_logging(&cli.log_dir, DEFAULT_LOG_FILE) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    let result = match cli.command {
        Commands::Plan {
            config,
            source_info,
        } => plan::run(plan::PlanArgs {
            config,
            source_info,
        }),
        Commands::Export {
            config,
            output,
            source_info,
            checkpoint,
            records,
        } => export::run(export::ExportArgs {
            config,
            output,
            source_info,
            checkpoint,
            records,
        }),
        Commands::Resume {
            checkpoint,
            output,
            records,
        } => resume::run(resume::ResumeArgs {
            checkpoint,
            output,
            records,
        }),
    };

    if let Err(e) = result {
        e.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export() {
        let cli = Cli::try_parse_from([
            "tileseed",
            "export",
            "--config",
            "job.json",
            "--output",
            "tiles.txt",
            "--records",
        ])
        .unwrap();
        assert_eq!(cli.log_dir, PathBuf::from("logs"));
        let Commands::Export {
            records,
            checkpoint,
            ..
        } = cli.command
        else {
            panic!("expected export");
        };
        assert!(records);
        assert!(checkpoint.is_none());
    }

    #[test]
    fn test_resume_requires_output() {
        assert!(Cli::try_parse_from(["tileseed", "resume"]).is_err());
    }

    #[test]
    fn test_global_log_dir() {
        let cli = Cli::try_parse_from([
            "tileseed",
            "plan",
            "--config",
            "job.json",
            "--log-dir",
            "/tmp/tileseed-logs",
        ])
        .unwrap();
        assert_eq!(cli.log_dir, PathBuf::from("/tmp/tileseed-logs"));
    }
}
