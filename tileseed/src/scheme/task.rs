//! External render task contract.
//!
//! A scheme hands every dispatched tile to a [`RenderTask`] as a
//! [`RenderJob`]. The task classifies the tile by consuming the job through
//! exactly one of [`RenderJob::unique`], [`RenderJob::duplicate`],
//! [`RenderJob::skip`] or [`RenderJob::error`], at any later time and in any
//! order relative to other jobs.
//!
//! Resolutions travel back to the scheduler over an unbounded channel. The
//! scheduler applies them on its own turn, so a task resolving a job from
//! inside `render` never re-enters dispatch.
//!
//! # Example
//!
//! ```ignore
//! use tileseed::scheme::{RenderJob, RenderTask};
//!
//! struct Touch;
//!
//! impl RenderTask for Touch {
//!     fn render(&mut self, job: RenderJob) {
//!         job.unique();
//!     }
//!
//!     fn finished(&mut self) {}
//! }
//! ```

use std::fmt;

use tokio::sync::mpsc;
use tracing::warn;

use crate::tile::Tile;

/// Format used when a task declares none.
pub const DEFAULT_FORMAT: &str = "tile";

/// Identifies one outstanding `render` call.
pub type DispatchId = u64;

/// Classification of a rendered tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Rendered and new
    Unique,
    /// Rendered but identical to an existing artifact
    Duplicate,
    /// Deliberately not rendered; pyramid descent prunes below it
    Skip,
    /// Render failed; never retried by the scheduler
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Outcome::Unique => "unique",
            Outcome::Duplicate => "duplicate",
            Outcome::Skip => "skip",
            Outcome::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// A resolution travelling from a task back to its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub id: DispatchId,
    pub outcome: Outcome,
}

/// One dispatched render call.
///
/// The resolution methods consume the job, so each job resolves at most
/// once. A job dropped without being resolved reports itself as
/// [`Outcome::Error`].
pub struct RenderJob {
    id: DispatchId,
    tile: Tile,
    format: String,
    reply: Option<mpsc::UnboundedSender<Resolution>>,
}

impl RenderJob {
    pub(crate) fn new(
        id: DispatchId,
        tile: Tile,
        format: String,
        reply: mpsc::UnboundedSender<Resolution>,
    ) -> Self {
        Self {
            id,
            tile,
            format,
            reply: Some(reply),
        }
    }

    pub fn id(&self) -> DispatchId {
        self.id
    }

    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn unique(self) {
        self.resolve(Outcome::Unique);
    }

    pub fn duplicate(self) {
        self.resolve(Outcome::Duplicate);
    }

    pub fn skip(self) {
        self.resolve(Outcome::Skip);
    }

    pub fn error(self) {
        self.resolve(Outcome::Error);
    }

    pub fn resolve(mut self, outcome: Outcome) {
        self.send(outcome);
    }

    fn send(&mut self, outcome: Outcome) {
        if let Some(reply) = self.reply.take() {
            // The scheduler may already be gone; nothing left to account then.
            let _ = reply.send(Resolution {
                id: self.id,
                outcome,
            });
        }
    }
}

impl Drop for RenderJob {
    fn drop(&mut self) {
        if self.reply.is_some() {
            warn!(
                id = self.id,
                tile = %self.tile,
                format = %self.format,
                "Render job dropped without resolution, counting as error"
            );
            self.send(Outcome::Error);
        }
    }
}

impl fmt::Debug for RenderJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderJob")
            .field("id", &self.id)
            .field("tile", &self.tile)
            .field("format", &self.format)
            .field("resolved", &self.reply.is_none())
            .finish()
    }
}

/// The render/fetch backend a scheme drives.
pub trait RenderTask: Send {
    /// Formats each tile is rendered in. An empty list means [`DEFAULT_FORMAT`].
    fn formats(&self) -> Vec<String> {
        vec![DEFAULT_FORMAT.to_string()]
    }

    /// Starts rendering one tile in one format.
    ///
    /// Must not block. The job may be resolved immediately or kept and
    /// resolved later.
    fn render(&mut self, job: RenderJob);

    /// Called exactly once, when the scheme finishes.
    fn finished(&mut self);
}

/// Resolves the formats a scheme renders for `task`.
pub(crate) fn effective_formats(task: &dyn RenderTask) -> Vec<String> {
    let formats = task.formats();
    if formats.is_empty() {
        vec![DEFAULT_FORMAT.to_string()]
    } else {
        formats
    }
}
