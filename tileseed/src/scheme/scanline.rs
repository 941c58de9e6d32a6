//! Row-major scan over zoom levels.
//!
//! [`ScanlineCursor`] walks every tile of a [`TileRanges`] table zoom by
//! zoom, row by row, optionally in metatile-sized blocks. The cursor is
//! plain data and is stored as-is in checkpoints.
//!
//! [`ScanlineTraversal`] turns the cursor into a scheme strategy. All
//! members of a metatile block are dispatched together, even past the
//! concurrency bound, because they share one render.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::checkpoint::{check_tiles, TraversalCheckpoint};
use super::{SchemeType, Step, Traversal, Unit};
use crate::config::SchemeConfig;
use crate::coord::TileRanges;
use crate::error::SchemeResult;
use crate::tile::{Metatile, Tile, MAX_METATILE};

/// Position of a row-major scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanlineCursor {
    levels: TileRanges,
    metatile: u32,
    z: u8,
    x: u32,
    y: u32,
}

impl ScanlineCursor {
    pub fn new(levels: TileRanges, metatile: u32) -> Self {
        let z = levels.minzoom();
        let mut cursor = Self {
            levels,
            metatile: metatile.max(1),
            z,
            x: 0,
            y: 0,
        };
        cursor.reset_origin();
        cursor
    }

    pub fn levels(&self) -> &TileRanges {
        &self.levels
    }

    pub fn metatile(&self) -> u32 {
        self.metatile
    }

    /// Tiles covered by the whole scan.
    pub fn total(&self) -> u64 {
        self.levels.total()
    }

    /// Checks a cursor read back from a checkpoint.
    pub(crate) fn validate(&self) -> Result<(), String> {
        self.levels.validate().map_err(|e| format!("cursor: {}", e))?;
        if !(1..=MAX_METATILE).contains(&self.metatile) {
            return Err(format!(
                "cursor metatile {} is outside 1..={}",
                self.metatile, MAX_METATILE
            ));
        }
        Ok(())
    }

    /// Moves to the first aligned block of the current zoom.
    fn reset_origin(&mut self) {
        if let Some(range) = self.levels.get(self.z) {
            let m = self.metatile;
            self.x = range.min_x / m * m;
            self.y = range.min_y / m * m;
        }
    }

    /// Returns the next block and its in-range members, or `None` once
    /// every zoom has been scanned.
    pub fn next_metatile(&mut self) -> Option<(Metatile, Vec<Tile>)> {
        loop {
            let range = *self.levels.get(self.z)?;
            let m = self.metatile;

            if range.is_empty() || self.y > range.max_y {
                self.z += 1;
                self.reset_origin();
                continue;
            }

            let block = Metatile {
                z: self.z,
                x: self.x,
                y: self.y,
                size: m,
            };

            self.x = self.x.saturating_add(m);
            if self.x > range.max_x {
                self.x = range.min_x / m * m;
                self.y = self.y.saturating_add(m);
            }

            let members = block.members_in(&range);
            if !members.is_empty() {
                return Some((block, members));
            }
        }
    }

    /// Returns the next tile of a scan with metatile size 1.
    pub fn next_tile(&mut self) -> Option<Tile> {
        debug_assert_eq!(self.metatile, 1, "next_tile on a metatile scan");
        self.next_metatile()
            .and_then(|(_, members)| members.into_iter().next())
    }
}

/// Checkpoint section of a scanline scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanlineState {
    pub cursor: ScanlineCursor,
    /// Tiles to dispatch before the cursor resumes.
    pub queue: Vec<Tile>,
}

impl ScanlineState {
    pub(crate) fn validate(&self) -> Result<(), String> {
        self.cursor.validate()?;
        check_tiles("queue", &self.queue)
    }
}

/// Scanline strategy.
#[derive(Debug, Clone)]
pub struct ScanlineTraversal {
    cursor: ScanlineCursor,
    /// Tiles carried over from a checkpoint.
    queue: VecDeque<Tile>,
    /// Undispatched members of the current metatile block.
    block: VecDeque<Tile>,
}

impl ScanlineTraversal {
    pub fn new(config: &SchemeConfig) -> SchemeResult<Self> {
        let levels = TileRanges::new(&config.bounds, config.minzoom, config.maxzoom())?;
        Ok(Self::from_cursor(ScanlineCursor::new(levels, config.metatile)))
    }

    pub fn from_cursor(cursor: ScanlineCursor) -> Self {
        Self {
            cursor,
            queue: VecDeque::new(),
            block: VecDeque::new(),
        }
    }

    pub fn restore(state: ScanlineState) -> Self {
        Self {
            cursor: state.cursor,
            queue: state.queue.into(),
            block: VecDeque::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.cursor.total()
    }
}

impl Traversal for ScanlineTraversal {
    fn scheme_type(&self) -> SchemeType {
        SchemeType::Scanline
    }

    fn next_unit(&mut self) -> Step {
        if let Some(tile) = self.queue.pop_front() {
            return Step::Unit(Unit::new(tile));
        }
        if let Some(tile) = self.block.pop_front() {
            return Step::Unit(Unit::new(tile));
        }

        match self.cursor.next_metatile() {
            Some((_, members)) => {
                self.block.extend(members);
                match self.block.pop_front() {
                    Some(tile) => Step::Unit(Unit::new(tile)),
                    None => Step::Continue,
                }
            }
            None => Step::Exhausted,
        }
    }

    fn has_open_block(&self) -> bool {
        !self.block.is_empty()
    }

    fn checkpoint(&self, open: &[&Unit]) -> TraversalCheckpoint {
        let queue = open
            .iter()
            .map(|unit| unit.tile.clone())
            .chain(self.queue.iter().cloned())
            .chain(self.block.iter().cloned())
            .collect();

        TraversalCheckpoint::Scanline(ScanlineState {
            cursor: self.cursor.clone(),
            queue,
        })
    }
}
