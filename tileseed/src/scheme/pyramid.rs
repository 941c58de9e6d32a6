//! Depth-first pyramid traversal.
//!
//! The top zoom level (`minzoom`) is enumerated with a [`ScanlineCursor`].
//! Everything below it is discovered by descent: when a tile resolves as
//! unique or duplicate, its children inside the next zoom's range are
//! queued, down to `maxdepth`. A skipped tile prunes its whole subtree and
//! accounts for it in one step by adding the subtree's in-bounds size to
//! `stats.skipped`.
//!
//! Work waiting for dispatch lives in two places:
//!
//! - `stack`: a LIFO of tiles and metatile records, giving depth-first order
//! - `open_box`: undispatched members of the metatile currently being drained
//!
//! Dispatch priority is box, then stack, then the top-level scan. Members
//! of an open box are dispatched even past the concurrency bound since
//! they share a render that is already in flight.
//!
//! With metatiles, the children of a block's members are collected on the
//! block and only pushed (regrouped into child blocks) once every member of
//! the block has resolved. An errored member still counts toward that, so
//! a single failure does not strand the children of its siblings.
//!
//! A tile rendered in several formats descends or prunes once, after its
//! last format resolves, on the outcome of the first format. If png skips
//! and webp is unique, the subtree is pruned.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::checkpoint::{check_tiles, TraversalCheckpoint};
use super::scanline::ScanlineCursor;
use super::{MetatileId, Outcome, SchemeType, Step, Traversal, Unit};
use crate::config::SchemeConfig;
use crate::coord::{TileRanges, MAX_ZOOM};
use crate::error::SchemeResult;
use crate::statistics::Statistics;
use crate::tile::{MetatileRecord, Tile, MAX_METATILE};

/// An entry of the descent stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StackEntry {
    Tile(Tile),
    Metatile(MetatileRecord),
}

/// Checkpoint section of a pyramid scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidState {
    /// Scan position over the top level.
    pub cursor: ScanlineCursor,
    /// Ranges from `minzoom` down to `maxdepth`.
    pub levels: TileRanges,
    pub maxdepth: u8,
    pub metatile: u32,
    pub stack: Vec<StackEntry>,
}

impl PyramidState {
    pub(crate) fn validate(&self) -> Result<(), String> {
        self.cursor.validate()?;
        self.levels.validate().map_err(|e| format!("levels: {}", e))?;
        if self.maxdepth > MAX_ZOOM {
            return Err(format!("maxdepth {} exceeds {}", self.maxdepth, MAX_ZOOM));
        }
        if self.metatile != self.cursor.metatile() {
            return Err(format!(
                "metatile {} does not match cursor metatile {}",
                self.metatile,
                self.cursor.metatile()
            ));
        }

        for entry in &self.stack {
            match entry {
                StackEntry::Tile(tile) => check_tiles("stack", [tile])?,
                StackEntry::Metatile(record) => {
                    if !(1..=MAX_METATILE).contains(&record.size) {
                        return Err(format!(
                            "metatile record size {} is outside 1..={}",
                            record.size, MAX_METATILE
                        ));
                    }
                    check_tiles("stack", [&Tile::new(record.z, record.x, record.y)])?;
                    check_tiles("metatile members", &record.members)?;
                    check_tiles("metatile children", &record.children)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct OpenMetatile {
    /// Record with members cleared; `children` accumulates.
    record: MetatileRecord,
    /// Members not yet resolved, dispatched or still in the box.
    pending: usize,
}

/// Pyramid strategy.
///
/// Descent follows the first format's outcome when formats disagree.
#[derive(Debug, Clone)]
pub struct PyramidTraversal {
    top: ScanlineCursor,
    levels: TileRanges,
    maxdepth: u8,
    metatile: u32,
    stack: Vec<StackEntry>,
    open_box: VecDeque<Tile>,
    box_owner: Option<MetatileId>,
    open: HashMap<MetatileId, OpenMetatile>,
    next_metatile_id: MetatileId,
}

impl PyramidTraversal {
    pub fn new(config: &SchemeConfig) -> SchemeResult<Self> {
        let maxdepth = config.maxdepth();
        let levels = TileRanges::new(&config.bounds, config.minzoom, maxdepth)?;
        let top = ScanlineCursor::new(levels.truncated(config.minzoom), config.metatile);
        let metatile = top.metatile();
        Ok(Self::with_parts(top, levels, maxdepth, metatile, Vec::new()))
    }

    pub fn restore(state: PyramidState) -> Self {
        Self::with_parts(
            state.cursor,
            state.levels,
            state.maxdepth,
            state.metatile,
            state.stack,
        )
    }

    fn with_parts(
        top: ScanlineCursor,
        levels: TileRanges,
        maxdepth: u8,
        metatile: u32,
        stack: Vec<StackEntry>,
    ) -> Self {
        Self {
            top,
            levels,
            maxdepth,
            metatile,
            stack,
            open_box: VecDeque::new(),
            box_owner: None,
            open: HashMap::new(),
            next_metatile_id: 0,
        }
    }

    /// Top-level tile count.
    ///
    /// Descendants are not included: how much of the pyramid gets visited
    /// depends on how tiles resolve.
    pub fn total(&self) -> u64 {
        self.top.total()
    }

    /// Number of entries waiting on the stack.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Number of metatiles with unresolved members.
    pub fn open_metatiles(&self) -> usize {
        self.open.len()
    }

    fn open_metatile(&mut self, mut record: MetatileRecord) {
        let members = std::mem::take(&mut record.members);
        if members.is_empty() {
            self.push_children(&record);
            return;
        }

        let id = self.next_metatile_id;
        self.next_metatile_id += 1;
        trace!(
            metatile = id,
            z = record.z,
            x = record.x,
            y = record.y,
            members = members.len(),
            "Opening metatile"
        );

        self.open.insert(
            id,
            OpenMetatile {
                pending: members.len(),
                record,
            },
        );
        self.open_box = members.into();
        self.box_owner = Some(id);
    }

    /// Pushes the regrouped children of a completed metatile so the first
    /// child block pops first.
    fn push_children(&mut self, record: &MetatileRecord) {
        for child in record.child_records().into_iter().rev() {
            self.stack.push(StackEntry::Metatile(child));
        }
    }

    fn descend(&mut self, unit: &Unit) {
        let tile = &unit.tile;
        if tile.z >= self.maxdepth {
            return;
        }
        let Some(range) = self.levels.get(tile.z + 1) else {
            return;
        };
        let children = tile.children_in(range);

        match unit.metatile.and_then(|id| self.open.get_mut(&id)) {
            Some(open) => open.record.children.extend(children),
            None => {
                for child in children.into_iter().rev() {
                    self.stack.push(StackEntry::Tile(child));
                }
            }
        }
    }

    /// Marks one metatile member as resolved.
    fn release(&mut self, unit: &Unit) {
        let Some(id) = unit.metatile else {
            return;
        };
        let done = match self.open.get_mut(&id) {
            Some(open) => {
                open.pending = open.pending.saturating_sub(1);
                open.pending == 0
            }
            None => false,
        };
        if done {
            if let Some(open) = self.open.remove(&id) {
                if self.box_owner == Some(id) {
                    self.box_owner = None;
                }
                self.push_children(&open.record);
            }
        }
    }
}

impl Traversal for PyramidTraversal {
    fn scheme_type(&self) -> SchemeType {
        SchemeType::Pyramid
    }

    fn next_unit(&mut self) -> Step {
        if let Some(tile) = self.open_box.pop_front() {
            return Step::Unit(Unit {
                tile,
                metatile: self.box_owner,
            });
        }

        if let Some(entry) = self.stack.pop() {
            return match entry {
                StackEntry::Tile(tile) => Step::Unit(Unit::new(tile)),
                StackEntry::Metatile(record) => {
                    self.open_metatile(record);
                    Step::Continue
                }
            };
        }

        if self.metatile > 1 {
            match self.top.next_metatile() {
                Some((block, members)) => {
                    self.open_metatile(MetatileRecord::new(block, members));
                    Step::Continue
                }
                None => Step::Exhausted,
            }
        } else {
            match self.top.next_tile() {
                Some(tile) => Step::Unit(Unit::new(tile)),
                None => Step::Exhausted,
            }
        }
    }

    fn has_open_block(&self) -> bool {
        !self.open_box.is_empty()
    }

    fn on_resolved(&mut self, unit: &Unit, outcome: Outcome, stats: &mut Statistics) {
        match outcome {
            Outcome::Unique | Outcome::Duplicate => self.descend(unit),
            Outcome::Skip => stats.skipped += unit.tile.descendant_count(&self.levels),
            Outcome::Error => {}
        }
        self.release(unit);
    }

    fn checkpoint(&self, open: &[&Unit]) -> TraversalCheckpoint {
        // Fold in-flight metatile members and the open box back into one
        // record per metatile, keeping the children collected so far.
        let mut folded: BTreeMap<MetatileId, MetatileRecord> = BTreeMap::new();
        let mut plain = Vec::new();

        let box_units = self.box_owner.into_iter().flat_map(|id| {
            self.open_box.iter().map(move |tile| (Some(id), tile))
        });
        let open_units = open.iter().map(|unit| (unit.metatile, &unit.tile));

        for (owner, tile) in open_units.chain(box_units) {
            match owner.and_then(|id| self.open.get(&id).map(|m| (id, m))) {
                Some((id, metatile)) => folded
                    .entry(id)
                    .or_insert_with(|| metatile.record.clone())
                    .members
                    .push(tile.clone()),
                None => plain.push(tile.clone()),
            }
        }

        let mut stack = self.stack.clone();
        for mut record in folded.into_values().rev() {
            record.members.sort_by_key(|t| (t.y, t.x));
            record.members.dedup();
            stack.push(StackEntry::Metatile(record));
        }
        for tile in plain.into_iter().rev() {
            stack.push(StackEntry::Tile(tile));
        }

        TraversalCheckpoint::Pyramid(PyramidState {
            cursor: self.top.clone(),
            levels: self.levels.clone(),
            maxdepth: self.maxdepth,
            metatile: self.metatile,
            stack,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_unit(traversal: &mut PyramidTraversal) -> Option<Unit> {
        loop {
            match traversal.next_unit() {
                Step::Unit(unit) => return Some(unit),
                Step::Continue => continue,
                _ => return None,
            }
        }
    }

    #[test]
    fn test_top_level_only_until_descent() {
        let config = SchemeConfig::default().with_zoom(0, 0).with_maxdepth(2);
        let mut traversal = PyramidTraversal::new(&config).unwrap();
        assert_eq!(traversal.total(), 1);

        let root = take_unit(&mut traversal).unwrap();
        assert_eq!(root.tile, Tile::new(0, 0, 0));
        assert!(take_unit(&mut traversal).is_none());

        let mut stats = Statistics::new(1);
        traversal.on_resolved(&root, Outcome::Unique, &mut stats);
        assert_eq!(traversal.stack_len(), 4);

        let first = take_unit(&mut traversal).unwrap();
        assert_eq!(first.tile, Tile::new(1, 0, 0));
    }

    #[test]
    fn test_depth_first_order() {
        let config = SchemeConfig::default().with_zoom(0, 0).with_maxdepth(2);
        let mut traversal = PyramidTraversal::new(&config).unwrap();
        let mut stats = Statistics::new(1);

        let mut order = Vec::new();
        while let Some(unit) = take_unit(&mut traversal) {
            order.push(unit.tile.to_string());
            traversal.on_resolved(&unit, Outcome::Unique, &mut stats);
        }

        assert_eq!(order.len(), 1 + 4 + 16);
        assert_eq!(&order[..4], &["0/0/0", "1/0/0", "2/0/0", "2/1/0"]);
        assert_eq!(order[6], "1/1/0");
    }

    #[test]
    fn test_skip_counts_subtree() {
        let config = SchemeConfig::default().with_zoom(0, 0).with_maxdepth(3);
        let mut traversal = PyramidTraversal::new(&config).unwrap();
        let mut stats = Statistics::new(1);

        let root = take_unit(&mut traversal).unwrap();
        traversal.on_resolved(&root, Outcome::Skip, &mut stats);
        assert_eq!(stats.skipped, 4 + 16 + 64);
        assert!(take_unit(&mut traversal).is_none());
    }

    #[test]
    fn test_error_does_not_descend() {
        let config = SchemeConfig::default().with_zoom(0, 0).with_maxdepth(3);
        let mut traversal = PyramidTraversal::new(&config).unwrap();
        let mut stats = Statistics::new(1);

        let root = take_unit(&mut traversal).unwrap();
        traversal.on_resolved(&root, Outcome::Error, &mut stats);
        assert_eq!(stats.skipped, 0);
        assert!(take_unit(&mut traversal).is_none());
    }

    #[test]
    fn test_metatile_children_wait_for_all_members() {
        let config = SchemeConfig::default()
            .with_zoom(1, 1)
            .with_maxdepth(2)
            .with_metatile(2);
        let mut traversal = PyramidTraversal::new(&config).unwrap();
        let mut stats = Statistics::new(4);

        let members: Vec<Unit> = (0..4).map(|_| take_unit(&mut traversal).unwrap()).collect();
        assert!(members.iter().all(|u| u.metatile == members[0].metatile));
        assert_eq!(traversal.open_metatiles(), 1);

        for unit in &members[..3] {
            traversal.on_resolved(unit, Outcome::Unique, &mut stats);
            assert_eq!(traversal.stack_len(), 0);
        }
        // An errored member still completes the block
        traversal.on_resolved(&members[3], Outcome::Error, &mut stats);
        assert_eq!(traversal.open_metatiles(), 0);
        // The errored member's block has no children and is dropped
        assert_eq!(traversal.stack_len(), 3);

        // First child block covers 2/0..1/0..1 and comes off the stack first
        let child = take_unit(&mut traversal).unwrap();
        assert_eq!(child.tile, Tile::new(2, 0, 0));
        assert!(traversal.has_open_block());
    }

    #[test]
    fn test_checkpoint_folds_open_metatile() {
        let config = SchemeConfig::default()
            .with_zoom(1, 1)
            .with_maxdepth(2)
            .with_metatile(2);
        let mut traversal = PyramidTraversal::new(&config).unwrap();
        let mut stats = Statistics::new(4);

        let a = take_unit(&mut traversal).unwrap();
        let b = take_unit(&mut traversal).unwrap();
        traversal.on_resolved(&a, Outcome::Unique, &mut stats);

        // b is in flight, two members still sit in the box
        let TraversalCheckpoint::Pyramid(state) = traversal.checkpoint(&[&b]) else {
            panic!("expected pyramid state");
        };
        assert_eq!(state.stack.len(), 1);
        let StackEntry::Metatile(record) = &state.stack[0] else {
            panic!("expected a metatile entry");
        };
        assert_eq!(record.members.len(), 3);
        assert!(!record.members.contains(&a.tile));
        assert_eq!(record.children.len(), 4);
    }

    #[test]
    fn test_checkpoint_keeps_plain_pending_tiles() {
        let config = SchemeConfig::default().with_zoom(1, 1);
        let mut traversal = PyramidTraversal::new(&config).unwrap();
        let a = take_unit(&mut traversal).unwrap();

        let TraversalCheckpoint::Pyramid(state) = traversal.checkpoint(&[&a]) else {
            panic!("expected pyramid state");
        };
        assert_eq!(state.stack, vec![StackEntry::Tile(Tile::new(1, 0, 0))]);

        let json = serde_json::to_string(&state).unwrap();
        let parsed: PyramidState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
