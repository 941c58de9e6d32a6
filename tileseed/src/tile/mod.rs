//! Tile geometry for job traversal.
//!
//! A [`Tile`] is one addressable `z/x/y` cell of the Web Mercator grid,
//! optionally carrying a resume key handed through from a manifest. This
//! module provides the two geometric queries the schemes need:
//!
//! - child enumeration clipped to the next zoom's [`TileRange`]
//! - the number of descendants inside a [`TileRanges`] table, used to account
//!   for a whole pruned subtree when a tile is skipped
//!
//! Square groups of tiles rendered together live in [`metatile`].

pub mod metatile;

pub use metatile::{Metatile, MetatileRecord, MAX_METATILE};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::coord::{TileRange, TileRanges, MAX_ZOOM};

/// Opaque resume key attached to a manifest record.
///
/// Manifests written by other tools use either string or numeric keys;
/// both are carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TileKey {
    Number(i64),
    Text(String),
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileKey::Number(n) => write!(f, "{}", n),
            TileKey::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A single tile address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub z: u8,
    pub x: u32,
    pub y: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<TileKey>,
}

impl Tile {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y, key: None }
    }

    pub fn with_key(mut self, key: TileKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Whether this address lies on the grid: `z` at most [`MAX_ZOOM`] and
    /// `x`, `y` below `2^z`.
    pub fn is_valid(&self) -> bool {
        self.z <= MAX_ZOOM
            && (self.x as u64) < (1u64 << self.z)
            && (self.y as u64) < (1u64 << self.z)
    }

    /// Returns this tile's children at `z + 1` that fall inside `range`.
    ///
    /// Children are returned in visiting order: top-left, top-right,
    /// bottom-left, bottom-right.
    pub fn children_in(&self, range: &TileRange) -> Vec<Tile> {
        let (x, y) = (self.x * 2, self.y * 2);
        [(x, y), (x + 1, y), (x, y + 1), (x + 1, y + 1)]
            .into_iter()
            .filter(|&(cx, cy)| range.contains(cx, cy))
            .map(|(cx, cy)| Tile::new(self.z + 1, cx, cy))
            .collect()
    }

    /// Counts descendants of this tile that fall inside `levels`.
    ///
    /// Every zoom below this tile up to `levels.maxzoom()` contributes the
    /// part of the tile's footprint that intersects that zoom's range. The
    /// tile itself is not counted.
    pub fn descendant_count(&self, levels: &TileRanges) -> u64 {
        let mut count = 0;
        for z in (self.z + 1)..=levels.maxzoom() {
            let Some(range) = levels.get(z) else {
                continue;
            };
            let depth = (z - self.z) as u32;
            let x0 = (self.x as u64) << depth;
            let y0 = (self.y as u64) << depth;
            let x1 = ((self.x as u64 + 1) << depth) - 1;
            let y1 = ((self.y as u64 + 1) << depth) - 1;
            count += range.clip(x0, x1, y0, y1);
        }
        count
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Bounds, WORLD_BOUNDS};

    #[test]
    fn test_display() {
        assert_eq!(Tile::new(3, 4, 5).to_string(), "3/4/5");
    }

    #[test]
    fn test_grid_validity() {
        assert!(Tile::new(0, 0, 0).is_valid());
        assert!(Tile::new(3, 7, 7).is_valid());
        assert!(!Tile::new(3, 8, 0).is_valid());
        assert!(!Tile::new(3, 0, 8).is_valid());
        assert!(Tile::new(30, (1 << 30) - 1, 0).is_valid());
        assert!(!Tile::new(31, 0, 0).is_valid());
        assert!(!Tile::new(255, 0, 0).is_valid());
    }

    #[test]
    fn test_children_order() {
        let range = TileRange::new(0, 0, 3, 3);
        let children = Tile::new(1, 1, 0).children_in(&range);
        assert_eq!(
            children,
            vec![
                Tile::new(2, 2, 0),
                Tile::new(2, 3, 0),
                Tile::new(2, 2, 1),
                Tile::new(2, 3, 1),
            ]
        );
    }

    #[test]
    fn test_children_clipped() {
        let range = TileRange::new(0, 0, 0, 1);
        let children = Tile::new(0, 0, 0).children_in(&range);
        assert_eq!(children, vec![Tile::new(1, 0, 0), Tile::new(1, 0, 1)]);
    }

    #[test]
    fn test_descendant_count_world() {
        let levels = TileRanges::new(&WORLD_BOUNDS, 0, 3).unwrap();
        // 4 + 16 + 64 below the root
        assert_eq!(Tile::new(0, 0, 0).descendant_count(&levels), 84);
        // A zoom 1 tile owns a quarter of each deeper level
        assert_eq!(Tile::new(1, 1, 1).descendant_count(&levels), 4 + 16);
        assert_eq!(Tile::new(3, 0, 0).descendant_count(&levels), 0);
    }

    #[test]
    fn test_descendant_count_clipped() {
        let bounds = Bounds::new(-180.0, 0.0, 0.0, 85.0511);
        let levels = TileRanges::new(&bounds, 0, 2).unwrap();
        // Only the north-west quadrant is in bounds
        assert_eq!(Tile::new(0, 0, 0).descendant_count(&levels), 1 + 4);
    }

    #[test]
    fn test_key_accepts_string_or_number() {
        let tile: Tile = serde_json::from_str(r#"{"z":1,"x":0,"y":1,"key":42}"#).unwrap();
        assert_eq!(tile.key, Some(TileKey::Number(42)));

        let tile: Tile = serde_json::from_str(r#"{"z":1,"x":0,"y":1,"key":"abc"}"#).unwrap();
        assert_eq!(tile.key, Some(TileKey::Text("abc".to_string())));

        let tile: Tile = serde_json::from_str(r#"{"z":1,"x":0,"y":1}"#).unwrap();
        assert!(tile.key.is_none());
        assert_eq!(serde_json::to_string(&tile).unwrap(), r#"{"z":1,"x":0,"y":1}"#);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_descendants_match_enumeration(
                west in -180.0..0.0_f64,
                east in 0.0..180.0_f64,
                south in -85.0..0.0_f64,
                north in 0.0..85.0_f64,
                root_z in 0u8..=2,
                seed in any::<u32>(),
                depth in 1u8..=4
            ) {
                // Walking every cell of the footprint at each level agrees
                // with the closed-form count.
                let bounds = Bounds::new(west, south, east, north);
                let levels = TileRanges::new(&bounds, 0, root_z + depth)?;
                let side = 1u32 << root_z;
                let root = Tile::new(root_z, seed % side, (seed / side) % side);

                let mut frontier = vec![root.clone()];
                let mut visited = 0u64;
                for z in (root_z + 1)..=(root_z + depth) {
                    frontier = frontier
                        .iter()
                        .flat_map(|t| t.children_in(&TileRange::new(0, 0, u32::MAX, u32::MAX)))
                        .collect();
                    let range = levels.get(z).unwrap();
                    visited += frontier.iter().filter(|t| range.contains(t.x, t.y)).count() as u64;
                }

                prop_assert_eq!(root.descendant_count(&levels), visited);
            }
        }
    }
}
