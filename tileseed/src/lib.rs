//! Tileseed - resumable tile pyramid generation
//!
//! This library schedules bulk map tile generation. A scheme enumerates the
//! tiles of a job (row by row, depth first through the zoom pyramid, or from
//! a manifest), hands them to a caller-supplied [`RenderTask`] with bounded
//! concurrency, and tracks how each one resolved. Jobs can be paused at any
//! point, checkpointed to JSON, and resumed without repeating work.
//!
//! # Example
//!
//! ```no_run
//! use tileseed::{RenderJob, RenderTask, Scheme, SchemeConfig, SchemeRunner};
//!
//! struct Print;
//!
//! impl RenderTask for Print {
//!     fn render(&mut self, job: RenderJob) {
//!         println!("{}", job.tile());
//!         job.unique();
//!     }
//!
//!     fn finished(&mut self) {}
//! }
//!
//! # async fn demo() -> tileseed::SchemeResult<()> {
//! let config = SchemeConfig::default().with_zoom(0, 4);
//! let scheme = Scheme::create(&config, Box::new(Print))?;
//! let outcome = SchemeRunner::new(scheme).run().await;
//! assert!(outcome.is_finished());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coord;
pub mod error;
pub mod logging;
pub mod scheme;
pub mod statistics;
pub mod tile;

pub use config::{SchemeConfig, SourceInfo};
pub use error::{SchemeError, SchemeResult};
pub use scheme::{
    Checkpoint, Outcome, RenderJob, RenderTask, RunOutcome, Scheme, SchemeEvent, SchemeRunner,
    SchemeType,
};
pub use statistics::{Statistics, StatsSnapshot};
pub use tile::Tile;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
