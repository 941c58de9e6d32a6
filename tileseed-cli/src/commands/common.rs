//! Common types and utilities shared across CLI commands.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tileseed::config::SourceInfo;
use tileseed::scheme::{LineFormat, RenderJob, RenderTask, RunOutcome, Scheme, SchemeRunner};
use tileseed::SchemeConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;

/// Default checkpoint file, relative to the working directory.
pub const DEFAULT_CHECKPOINT: &str = "tileseed.checkpoint.json";

/// How often the progress bar refreshes from statistics.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Render task that appends every dispatched tile to a manifest.
///
/// Each tile resolves as unique once its line is written; a failed write
/// resolves it as an error.
pub struct ListTask<W: Write + Send> {
    writer: W,
    format: LineFormat,
}

impl<W: Write + Send> ListTask<W> {
    pub fn new(writer: W, format: LineFormat) -> Self {
        Self { writer, format }
    }
}

impl ListTask<BufWriter<File>> {
    /// Opens `path` for writing, truncating it unless `append` is set.
    pub fn create(path: &Path, format: LineFormat, append: bool) -> Result<Self, CliError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|error| CliError::Output {
                path: path.to_path_buf(),
                error,
            })?;
        Ok(Self::new(BufWriter::new(file), format))
    }
}

impl<W: Write + Send> RenderTask for ListTask<W> {
    fn render(&mut self, job: RenderJob) {
        let line = self.format.encode(job.tile());
        match writeln!(self.writer, "{}", line) {
            Ok(()) => job.unique(),
            Err(e) => {
                warn!(tile = %job.tile(), error = %e, "Failed to write tile");
                job.error();
            }
        }
    }

    fn finished(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "Failed to flush tile list");
        }
    }
}

impl<W: Write + Send> Drop for ListTask<W> {
    fn drop(&mut self) {
        // Paused runs never call finished()
        let _ = self.writer.flush();
    }
}

/// Line format selected by the `--records` flag.
pub fn line_format(records: bool) -> LineFormat {
    if records {
        LineFormat::Records
    } else {
        LineFormat::Coordinates
    }
}

/// Loads a job config and narrows it by optional source info.
pub fn load_config(path: &Path, source_info: Option<&Path>) -> Result<SchemeConfig, CliError> {
    let config = SchemeConfig::load(path)?;
    let info = source_info.and_then(SourceInfo::load_or_none);
    Ok(match info {
        Some(info) => config.restrict(&info),
        None => config,
    })
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} tiles {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Runs a scheme to completion or until Ctrl-C.
///
/// On Ctrl-C the job pauses, waits for in-flight tiles, and writes the
/// checkpoint to `checkpoint_path`. A finished job removes a stale
/// checkpoint left at that path.
pub fn run_scheme(scheme: Scheme, checkpoint_path: &Path) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, pausing after in-flight tiles...");
        handler_token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let bar = progress_bar(scheme.stats().total);
    bar.set_position(scheme.stats().processed());
    let progress = bar.clone();

    let mut runner = SchemeRunner::new(scheme)
        .with_cancellation(token)
        .with_progress(PROGRESS_INTERVAL, move |snapshot| {
            progress.set_length(snapshot.total.max(snapshot.processed));
            progress.set_position(snapshot.processed);
            progress.set_message(format!(
                "({}/s, {} failed)",
                snapshot.speed, snapshot.failed
            ));
        });

    let outcome = runtime.block_on(runner.run());
    bar.finish_and_clear();

    match outcome {
        RunOutcome::Finished(snapshot) => {
            println!(
                "Finished: {} unique, {} duplicate, {} skipped, {} failed",
                snapshot.unique, snapshot.duplicate, snapshot.skipped, snapshot.failed
            );
            if checkpoint_path.exists() {
                std::fs::remove_file(checkpoint_path).map_err(|error| CliError::Output {
                    path: checkpoint_path.to_path_buf(),
                    error,
                })?;
                info!(path = %checkpoint_path.display(), "Removed checkpoint of finished job");
            }
            if snapshot.failed > 0 {
                return Err(CliError::TilesFailed {
                    failed: snapshot.failed,
                    total: snapshot.processed,
                });
            }
            Ok(())
        }
        RunOutcome::Paused(checkpoint) => {
            checkpoint.save(checkpoint_path)?;
            println!("Paused. Checkpoint written to {}", checkpoint_path.display());
            println!(
                "Resume with: tileseed resume --checkpoint {}",
                checkpoint_path.display()
            );
            Ok(())
        }
    }
}

/// Resolves the checkpoint path argument.
pub fn checkpoint_path(arg: Option<PathBuf>) -> PathBuf {
    arg.unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT))
}
