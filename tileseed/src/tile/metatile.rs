//! Metatiles: square blocks of tiles rendered as one artifact.
//!
//! A metatile of size `n` at zoom `z` covers an `n x n` block of tiles whose
//! origin is aligned to a multiple of `n`. Its four child blocks at `z + 1`
//! have the same size and together cover exactly the children of its
//! members, which is what lets pyramid descent regroup children into
//! metatiles without recomputing alignment.

use serde::{Deserialize, Serialize};

use super::Tile;
use crate::coord::{TileRange, MAX_ZOOM};

/// Largest metatile edge: one block spanning the whole grid at [`MAX_ZOOM`].
pub const MAX_METATILE: u32 = 1 << (MAX_ZOOM as u32);

/// An aligned block of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metatile {
    pub z: u8,
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl Metatile {
    /// Returns the block of `size` containing `tile`.
    pub fn containing(tile: &Tile, size: u32) -> Self {
        let size = size.max(1);
        Self {
            z: tile.z,
            x: tile.x / size * size,
            y: tile.y / size * size,
            size,
        }
    }

    #[inline]
    pub fn contains(&self, tile: &Tile) -> bool {
        tile.z == self.z
            && (self.x..self.x.saturating_add(self.size)).contains(&tile.x)
            && (self.y..self.y.saturating_add(self.size)).contains(&tile.y)
    }

    /// Member tiles inside `range`, in row-major order.
    pub fn members_in(&self, range: &TileRange) -> Vec<Tile> {
        let span = self.size.saturating_sub(1);
        let x_end = self.x.saturating_add(span).min(range.max_x);
        let y_end = self.y.saturating_add(span).min(range.max_y);
        let x_start = self.x.max(range.min_x);
        let y_start = self.y.max(range.min_y);
        if range.is_empty() || x_start > x_end || y_start > y_end {
            return Vec::new();
        }

        let mut members =
            Vec::with_capacity((x_end - x_start + 1) as usize * (y_end - y_start + 1) as usize);
        for y in y_start..=y_end {
            for x in x_start..=x_end {
                members.push(Tile::new(self.z, x, y));
            }
        }
        members
    }

    /// The four blocks at `z + 1` covering this block's children, in
    /// visiting order.
    pub fn child_blocks(&self) -> [Metatile; 4] {
        let (x, y, s) = (self.x * 2, self.y * 2, self.size);
        let z = self.z + 1;
        [
            Metatile { z, x, y, size: s },
            Metatile { z, x: x + s, y, size: s },
            Metatile { z, x, y: y + s, size: s },
            Metatile { z, x: x + s, y: y + s, size: s },
        ]
    }
}

/// Serializable metatile with its outstanding members and collected children.
///
/// This is the unit the pyramid traversal keeps on its stack: `members` are
/// the tiles still to be rendered, `children` are the next-zoom tiles
/// gathered from members that have already resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetatileRecord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
    pub size: u32,
    pub members: Vec<Tile>,
    pub children: Vec<Tile>,
}

impl MetatileRecord {
    pub fn new(metatile: Metatile, members: Vec<Tile>) -> Self {
        Self {
            z: metatile.z,
            x: metatile.x,
            y: metatile.y,
            size: metatile.size,
            members,
            children: Vec::new(),
        }
    }

    pub fn metatile(&self) -> Metatile {
        Metatile {
            z: self.z,
            x: self.x,
            y: self.y,
            size: self.size,
        }
    }

    /// Groups the collected children into next-zoom metatile records.
    ///
    /// Records come back in visiting order with row-major members; blocks
    /// without any collected child are omitted.
    pub fn child_records(&self) -> Vec<MetatileRecord> {
        self.metatile()
            .child_blocks()
            .into_iter()
            .filter_map(|block| {
                let mut members: Vec<Tile> = self
                    .children
                    .iter()
                    .filter(|t| block.contains(t))
                    .cloned()
                    .collect();
                if members.is_empty() {
                    return None;
                }
                members.sort_by_key(|t| (t.y, t.x));
                members.dedup();
                Some(MetatileRecord::new(block, members))
            })
            .collect()
    }
}
