//! Resumable tile scheduling.
//!
//! A scheme selects which tiles to render, hands them to an external
//! [`RenderTask`] with bounded concurrency, and tracks how each one
//! resolved. It can be paused at any time, checkpointed once in-flight
//! work has drained, and restored later without revisiting completed work.
//!
//! # Architecture
//!
//! [`Scheduler`] owns the shared state machine: pending dispatches,
//! statistics, the pause/finish flags and the resolution channel. What to
//! dispatch next is delegated to a [`Traversal`] strategy:
//!
//! | Strategy | Order | Notes |
//! |----------|-------|-------|
//! | [`ScanlineTraversal`] | row-major over each zoom | optional metatile blocks |
//! | [`PyramidTraversal`] | depth-first from `minzoom` | descends on unique/duplicate, prunes on skip |
//! | [`FileTraversal`] | manifest order | chunked decode, no descent |
//!
//! [`Scheme`] is the scheduler over the closed [`Strategy`] registry and is
//! what configuration and checkpoints construct.
//!
//! # State Machine
//!
//! ```text
//!   idle ──start()──► running ◄──start()── paused
//!    │                   │  └───pause()────►  │
//!    │                   ▼                    │
//!    └──────────────► finished ◄──────────────┘
//! ```
//!
//! `finished` is terminal and is reached exactly once, when the traversal
//! is exhausted and nothing is pending. A scheme restored from a finished
//! checkpoint starts out finished.
//!
//! # Resolution Contract
//!
//! Every `render` call is answered by exactly one resolution. Resolutions
//! only record state; the follow-up dispatch step is deferred and run by
//! [`Scheduler::run_deferred`], never from inside a resolution. This keeps
//! recursion bounded and lets the driver interleave other work between
//! completions. Completion order is unconstrained.

pub mod checkpoint;
mod file;
pub mod manifest;
mod pyramid;
mod runner;
mod scanline;
pub mod task;

pub use checkpoint::{Checkpoint, TraversalCheckpoint};
pub use file::{FileState, FileTraversal};
pub use manifest::LineFormat;
pub use pyramid::{PyramidState, PyramidTraversal, StackEntry};
pub use runner::{RunOutcome, SchemeRunner, DEFAULT_PROGRESS_INTERVAL};
pub use scanline::{ScanlineCursor, ScanlineState, ScanlineTraversal};
pub use task::{DispatchId, Outcome, RenderJob, RenderTask, Resolution, DEFAULT_FORMAT};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::config::SchemeConfig;
use crate::error::{SchemeError, SchemeResult};
use crate::statistics::Statistics;
use crate::tile::Tile;

/// Identifies an open metatile within a traversal.
pub type MetatileId = u64;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 16;

/// Registered scheme types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemeType {
    File,
    Pyramid,
    #[default]
    Scanline,
}

impl SchemeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemeType::File => "file",
            SchemeType::Pyramid => "pyramid",
            SchemeType::Scanline => "scanline",
        }
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SchemeType {
    type Err = SchemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(SchemeType::File),
            "pyramid" => Ok(SchemeType::Pyramid),
            "scanline" => Ok(SchemeType::Scanline),
            other => Err(SchemeError::UnknownScheme(other.to_string())),
        }
    }
}

/// Lifecycle signals emitted by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeEvent {
    /// Paused with nothing in flight; safe to checkpoint.
    Paused,
    /// Traversal complete and all work resolved.
    Finished,
}

/// One tile handed out by a traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub tile: Tile,
    /// Owning metatile, when the tile was dispatched as a block member.
    pub metatile: Option<MetatileId>,
}

impl Unit {
    pub fn new(tile: Tile) -> Self {
        Self {
            tile,
            metatile: None,
        }
    }
}

/// Result of asking a traversal for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A tile to dispatch.
    Unit(Unit),
    /// Internal progress without a tile (e.g. a metatile was opened).
    Continue,
    /// An entry that cannot be dispatched; counted as failed.
    Rejected(String),
    /// No more work will come from this traversal.
    Exhausted,
}

/// Strategy deciding which tile a scheduler dispatches next.
pub trait Traversal: Send {
    fn scheme_type(&self) -> SchemeType;

    /// Produces the next step.
    ///
    /// Once `Exhausted` is returned, further calls must keep returning it
    /// until a resolution hands the traversal new work.
    fn next_unit(&mut self) -> Step;

    /// True while block members are queued; these bypass the concurrency bound.
    fn has_open_block(&self) -> bool {
        false
    }

    /// Called once per unit, after all of its format renders resolved.
    ///
    /// `outcome` is the resolution of the unit's first format. When formats
    /// disagree (one skipped, another unique) the first format decides, and
    /// the other formats' outcomes only move the counters.
    fn on_resolved(&mut self, _unit: &Unit, _outcome: Outcome, _stats: &mut Statistics) {}

    /// Captures the traversal state. `open` lists the units still in flight.
    fn checkpoint(&self, open: &[&Unit]) -> TraversalCheckpoint;
}

#[derive(Debug, Clone, Copy)]
struct PendingDispatch {
    unit_seq: u64,
    format_index: usize,
}

#[derive(Debug)]
struct OpenUnit {
    unit: Unit,
    /// Format renders not yet resolved.
    remaining: usize,
    primary: Option<Outcome>,
    /// Outcomes of the formats already resolved and counted.
    counted: Vec<Outcome>,
}

/// Scheduler state machine over a traversal strategy.
pub struct Scheduler<T: Traversal> {
    traversal: T,
    task: Box<dyn RenderTask>,
    formats: Vec<String>,
    concurrency: usize,
    stats: Statistics,
    pending: BTreeMap<DispatchId, PendingDispatch>,
    open_units: BTreeMap<u64, OpenUnit>,
    next_id: DispatchId,
    next_seq: u64,
    started: bool,
    paused: bool,
    finished: bool,
    deferred: usize,
    reply_tx: mpsc::UnboundedSender<Resolution>,
    reply_rx: mpsc::UnboundedReceiver<Resolution>,
    events: broadcast::Sender<SchemeEvent>,
}

impl<T: Traversal> Scheduler<T> {
    /// Creates an idle scheduler. Nothing is dispatched until [`start`](Self::start).
    pub fn new(
        traversal: T,
        task: Box<dyn RenderTask>,
        concurrency: usize,
        stats: Statistics,
    ) -> Self {
        let formats = task::effective_formats(task.as_ref());
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            traversal,
            task,
            formats,
            concurrency: concurrency.max(1),
            stats,
            pending: BTreeMap::new(),
            open_units: BTreeMap::new(),
            next_id: 0,
            next_seq: 0,
            started: false,
            paused: true,
            finished: false,
            deferred: 0,
            reply_tx,
            reply_rx,
            events,
        }
    }

    pub fn scheme_type(&self) -> SchemeType {
        self.traversal.scheme_type()
    }

    pub fn traversal(&self) -> &T {
        &self.traversal
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Dispatches currently awaiting resolution.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Subscribes to [`SchemeEvent`]s emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SchemeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SchemeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Starts or resumes dispatching.
    ///
    /// On an already finished scheme this only notifies the task.
    pub fn start(&mut self) {
        if self.finished {
            debug!(scheme = %self.scheme_type(), "Start on finished scheme");
            self.task.finished();
            self.emit(SchemeEvent::Finished);
            return;
        }

        info!(
            scheme = %self.scheme_type(),
            total = self.stats.total,
            processed = self.stats.processed(),
            concurrency = self.concurrency,
            resumed = self.started || self.stats.processed() > 0,
            "Starting scheme"
        );
        self.paused = false;
        self.started = true;
        self.next();
    }

    /// Stops new dispatch.
    ///
    /// [`SchemeEvent::Paused`] is emitted immediately when nothing is in
    /// flight, otherwise once the last pending dispatch resolves.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            info!(pending = self.pending.len(), "Pause requested");
            if self.pending.is_empty() {
                info!("Scheme paused");
                self.emit(SchemeEvent::Paused);
            }
        } else if !self.started {
            self.emit(SchemeEvent::Paused);
        }
    }

    /// Runs one dispatch step.
    ///
    /// Pulls units from the traversal while there is capacity or an open
    /// block, and finishes the scheme once the traversal is exhausted with
    /// nothing pending. Does nothing while paused or finished.
    pub fn next(&mut self) {
        if self.finished || self.paused {
            return;
        }

        let mut exhausted = false;
        while self.pending.len() < self.concurrency || self.traversal.has_open_block() {
            match self.traversal.next_unit() {
                Step::Unit(unit) => self.dispatch(unit),
                Step::Continue => {}
                Step::Rejected(reason) => {
                    warn!(reason = %reason, "Rejected work entry, counting as failed");
                    self.stats.failed += 1;
                }
                Step::Exhausted => {
                    exhausted = true;
                    break;
                }
            }
        }

        if exhausted && self.pending.is_empty() {
            self.finish();
        }
    }

    fn dispatch(&mut self, unit: Unit) {
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!(tile = %unit.tile, formats = self.formats.len(), "Dispatching tile");

        let tile = unit.tile.clone();
        self.open_units.insert(
            seq,
            OpenUnit {
                unit,
                remaining: self.formats.len(),
                primary: None,
                counted: Vec::with_capacity(self.formats.len()),
            },
        );

        for format_index in 0..self.formats.len() {
            let id = self.next_id;
            self.next_id += 1;
            self.pending.insert(
                id,
                PendingDispatch {
                    unit_seq: seq,
                    format_index,
                },
            );
            self.stats.pending += 1;

            let job = RenderJob::new(
                id,
                tile.clone(),
                self.formats[format_index].clone(),
                self.reply_tx.clone(),
            );
            self.task.render(job);
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        info!(
            scheme = %self.scheme_type(),
            total = self.stats.total,
            unique = self.stats.unique,
            duplicate = self.stats.duplicate,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            "Scheme finished"
        );
        self.task.finished();
        self.emit(SchemeEvent::Finished);
    }

    /// Applies one resolution.
    ///
    /// Unknown or already resolved ids are ignored. The follow-up dispatch
    /// step is deferred to [`run_deferred`](Self::run_deferred).
    pub fn resolve(&mut self, id: DispatchId, outcome: Outcome) {
        let Some(dispatch) = self.pending.remove(&id) else {
            warn!(id, outcome = %outcome, "Ignoring resolution for unknown dispatch");
            return;
        };
        self.stats.pending = self.stats.pending.saturating_sub(1);

        match outcome {
            Outcome::Unique => self.stats.unique += 1,
            Outcome::Duplicate => self.stats.duplicate += 1,
            Outcome::Skip => self.stats.skipped += 1,
            Outcome::Error => self.stats.failed += 1,
        }
        self.settle(dispatch, outcome);

        if self.paused && self.started && self.pending.is_empty() {
            info!("Scheme paused");
            self.emit(SchemeEvent::Paused);
        }

        self.deferred += 1;
    }

    /// Hands a unit to the traversal once its last format has resolved.
    fn settle(&mut self, dispatch: PendingDispatch, outcome: Outcome) {
        let done = match self.open_units.get_mut(&dispatch.unit_seq) {
            Some(open) => {
                if dispatch.format_index == 0 {
                    open.primary = Some(outcome);
                }
                open.counted.push(outcome);
                open.remaining = open.remaining.saturating_sub(1);
                open.remaining == 0
            }
            None => false,
        };

        if done {
            if let Some(open) = self.open_units.remove(&dispatch.unit_seq) {
                let outcome = open.primary.unwrap_or(outcome);
                self.traversal
                    .on_resolved(&open.unit, outcome, &mut self.stats);
            }
        }
    }

    pub fn unique(&mut self, id: DispatchId) {
        self.resolve(id, Outcome::Unique);
    }

    pub fn duplicate(&mut self, id: DispatchId) {
        self.resolve(id, Outcome::Duplicate);
    }

    pub fn skip(&mut self, id: DispatchId) {
        self.resolve(id, Outcome::Skip);
    }

    pub fn error(&mut self, id: DispatchId) {
        self.resolve(id, Outcome::Error);
    }

    /// Runs one dispatch step per resolution applied since the last call.
    pub fn run_deferred(&mut self) {
        while self.deferred > 0 {
            self.deferred -= 1;
            self.next();
        }
    }

    /// Applies every queued resolution, then runs the deferred steps.
    ///
    /// Returns the number of resolutions applied.
    pub fn process_resolutions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(resolution) = self.reply_rx.try_recv() {
            self.resolve(resolution.id, resolution.outcome);
            applied += 1;
        }
        self.run_deferred();
        applied
    }

    /// Repeats [`process_resolutions`](Self::process_resolutions) until no
    /// resolution is queued.
    ///
    /// Drives a scheme to completion when the task resolves jobs inline.
    pub fn process_all(&mut self) -> usize {
        let mut total = 0;
        loop {
            let applied = self.process_resolutions();
            if applied == 0 {
                return total;
            }
            total += applied;
        }
    }

    /// Waits for the next resolution sent by a [`RenderJob`].
    pub async fn next_resolution(&mut self) -> Option<Resolution> {
        self.reply_rx.recv().await
    }

    /// Captures a checkpoint.
    ///
    /// Taken while paused with nothing pending, the checkpoint is exact.
    /// Units still in flight are recorded for re-dispatch on restore in
    /// every format. Formats of such a unit that already resolved are taken
    /// back out of the recorded counters, so the unit is counted once.
    pub fn checkpoint(&self) -> Checkpoint {
        let open: Vec<&Unit> = self.open_units.values().map(|o| &o.unit).collect();

        let mut stats = self.stats.to_record();
        for outcome in self.open_units.values().flat_map(|o| &o.counted) {
            let counter = match outcome {
                Outcome::Unique => &mut stats.unique,
                Outcome::Duplicate => &mut stats.duplicate,
                Outcome::Skip => &mut stats.skipped,
                Outcome::Error => &mut stats.failed,
            };
            *counter = counter.saturating_sub(1);
        }

        Checkpoint {
            concurrency: self.concurrency,
            finished: self.finished,
            stats,
            traversal: self.traversal.checkpoint(&open),
        }
    }
}

impl<T: Traversal> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("scheme", &self.scheme_type())
            .field("concurrency", &self.concurrency)
            .field("formats", &self.formats)
            .field("pending", &self.pending.len())
            .field("started", &self.started)
            .field("paused", &self.paused)
            .field("finished", &self.finished)
            .field("stats", &self.stats)
            .finish()
    }
}

/// The registered traversal strategies.
#[derive(Debug, Clone)]
pub enum Strategy {
    Scanline(ScanlineTraversal),
    Pyramid(PyramidTraversal),
    File(FileTraversal),
}

impl Strategy {
    /// Tiles the strategy will enumerate up front.
    pub fn total(&self) -> u64 {
        match self {
            Strategy::Scanline(t) => t.total(),
            Strategy::Pyramid(t) => t.total(),
            Strategy::File(t) => t.total(),
        }
    }
}

impl Traversal for Strategy {
    fn scheme_type(&self) -> SchemeType {
        match self {
            Strategy::Scanline(t) => t.scheme_type(),
            Strategy::Pyramid(t) => t.scheme_type(),
            Strategy::File(t) => t.scheme_type(),
        }
    }

    fn next_unit(&mut self) -> Step {
        match self {
            Strategy::Scanline(t) => t.next_unit(),
            Strategy::Pyramid(t) => t.next_unit(),
            Strategy::File(t) => t.next_unit(),
        }
    }

    fn has_open_block(&self) -> bool {
        match self {
            Strategy::Scanline(t) => t.has_open_block(),
            Strategy::Pyramid(t) => t.has_open_block(),
            Strategy::File(t) => t.has_open_block(),
        }
    }

    fn on_resolved(&mut self, unit: &Unit, outcome: Outcome, stats: &mut Statistics) {
        match self {
            Strategy::Scanline(t) => t.on_resolved(unit, outcome, stats),
            Strategy::Pyramid(t) => t.on_resolved(unit, outcome, stats),
            Strategy::File(t) => t.on_resolved(unit, outcome, stats),
        }
    }

    fn checkpoint(&self, open: &[&Unit]) -> TraversalCheckpoint {
        match self {
            Strategy::Scanline(t) => t.checkpoint(open),
            Strategy::Pyramid(t) => t.checkpoint(open),
            Strategy::File(t) => t.checkpoint(open),
        }
    }
}

/// A scheduler over any registered strategy.
pub type Scheme = Scheduler<Strategy>;

impl Scheduler<Strategy> {
    /// Builds a scheme from configuration.
    pub fn create(config: &SchemeConfig, task: Box<dyn RenderTask>) -> SchemeResult<Self> {
        config.validate()?;

        let strategy = match config.scheme {
            SchemeType::Scanline => Strategy::Scanline(ScanlineTraversal::new(config)?),
            SchemeType::Pyramid => Strategy::Pyramid(PyramidTraversal::new(config)?),
            SchemeType::File => Strategy::File(FileTraversal::new(config)?),
        };
        let stats = Statistics::new(strategy.total());

        info!(
            scheme = %config.scheme,
            minzoom = config.minzoom,
            maxzoom = config.maxzoom(),
            total = stats.total,
            "Created scheme"
        );
        Ok(Scheduler::new(strategy, task, config.concurrency, stats))
    }

    /// Builds a scheme of the named type, overriding `config.scheme`.
    pub fn create_by_name(
        name: &str,
        config: &SchemeConfig,
        task: Box<dyn RenderTask>,
    ) -> SchemeResult<Self> {
        let scheme: SchemeType = name.parse()?;
        let config = config.clone().with_scheme(scheme);
        Self::create(&config, task)
    }

    /// Restores a scheme from a checkpoint.
    ///
    /// The restored scheme is paused and not started, with nothing pending.
    /// Fails with [`SchemeError::InvalidCheckpoint`] if the checkpoint's
    /// values do not pass [`Checkpoint::validate`].
    pub fn restore(checkpoint: Checkpoint, task: Box<dyn RenderTask>) -> SchemeResult<Self> {
        checkpoint.validate()?;

        let strategy = match checkpoint.traversal {
            TraversalCheckpoint::Scanline(state) => {
                Strategy::Scanline(ScanlineTraversal::restore(state))
            }
            TraversalCheckpoint::Pyramid(state) => {
                Strategy::Pyramid(PyramidTraversal::restore(state))
            }
            TraversalCheckpoint::File(state) => Strategy::File(FileTraversal::restore(state)?),
        };

        let mut stats = Statistics::from_record(&checkpoint.stats);
        stats.pending = 0;

        let mut scheme = Scheduler::new(strategy, task, checkpoint.concurrency, stats);
        scheme.finished = checkpoint.finished;
        info!(
            scheme = %scheme.scheme_type(),
            processed = scheme.stats.processed(),
            finished = scheme.finished,
            "Restored scheme from checkpoint"
        );
        Ok(scheme)
    }
}
