//! Export command - run a job and write its tiles to a manifest.

use std::path::PathBuf;

use tileseed::Scheme;
use tracing::info;

use super::common::{checkpoint_path, line_format, load_config, run_scheme, ListTask};
use crate::error::CliError;

/// Arguments for the export command.
pub struct ExportArgs {
    pub config: PathBuf,
    pub output: PathBuf,
    pub source_info: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub records: bool,
}

/// Run the export command.
pub fn run(args: ExportArgs) -> Result<(), CliError> {
    let config = load_config(&args.config, args.source_info.as_deref())?;
    let checkpoint = checkpoint_path(args.checkpoint);

    let task = ListTask::create(&args.output, line_format(args.records), false)?;
    let scheme = Scheme::create(&config, Box::new(task))?;

    info!(
        scheme = %config.scheme,
        output = %args.output.display(),
        total = scheme.stats().total,
        "Exporting tiles"
    );
    println!("Tileseed v{}", tileseed::VERSION);
    println!("Scheme: {} ({} tiles)", config.scheme, scheme.stats().total);
    println!("Output: {}", args.output.display());
    println!("Press Ctrl+C to pause and write a checkpoint");
    println!();

    run_scheme(scheme, &checkpoint)
}
