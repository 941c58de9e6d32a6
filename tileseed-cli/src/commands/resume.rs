//! Resume command - continue an export from a checkpoint.

use std::path::PathBuf;

use tileseed::{Checkpoint, Scheme};

use super::common::{checkpoint_path, line_format, run_scheme, ListTask};
use crate::error::CliError;

/// Arguments for the resume command.
pub struct ResumeArgs {
    pub checkpoint: Option<PathBuf>,
    pub output: PathBuf,
    pub records: bool,
}

/// Run the resume command.
pub fn run(args: ResumeArgs) -> Result<(), CliError> {
    let checkpoint_path = checkpoint_path(args.checkpoint);
    let checkpoint = Checkpoint::load(&checkpoint_path)?;

    // Tiles written before the pause stay in place
    let task = ListTask::create(&args.output, line_format(args.records), true)?;
    let scheme = Scheme::restore(checkpoint, Box::new(task))?;

    let stats = scheme.stats();
    println!(
        "Resuming {} scheme: {} of {} tiles done",
        scheme.scheme_type(),
        stats.processed(),
        stats.total
    );
    println!();

    run_scheme(scheme, &checkpoint_path)
}
