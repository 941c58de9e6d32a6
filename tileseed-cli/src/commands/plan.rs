//! Plan command - show what a job would enumerate.

use std::path::PathBuf;

use tileseed::scheme::SchemeType;

use super::common::load_config;
use crate::error::CliError;

/// Arguments for the plan command.
pub struct PlanArgs {
    pub config: PathBuf,
    pub source_info: Option<PathBuf>,
}

/// Run the plan command.
pub fn run(args: PlanArgs) -> Result<(), CliError> {
    let config = load_config(&args.config, args.source_info.as_deref())?;
    let plan = config.plan()?;

    println!("Scheme: {}", plan.scheme);
    if plan.scheme == SchemeType::File {
        if let Some(path) = &config.manifest_path {
            println!("Manifest: {}", path.display());
        }
    } else {
        println!("Bounds: {}", config.bounds);
        println!();
        println!("{:>4}  {:>21}  {:>21}  {:>12}", "zoom", "columns", "rows", "tiles");
        for level in &plan.levels {
            println!(
                "{:>4}  {:>21}  {:>21}  {:>12}",
                level.zoom,
                format!("{}-{}", level.range.min_x, level.range.max_x),
                format!("{}-{}", level.range.min_y, level.range.max_y),
                level.count
            );
        }
    }
    println!();

    match plan.scheme {
        SchemeType::Pyramid => println!(
            "Total: {} tiles at most ({} at zoom {})",
            plan.total,
            plan.levels.first().map_or(0, |l| l.count),
            config.minzoom
        ),
        _ => println!("Total: {} tiles", plan.total),
    }
    Ok(())
}
