//! Coordinate conversion module
//!
//! Converts geographic bounding boxes into the Web Mercator tile ranges a
//! job enumerates at each zoom level.
//!
//! The pixel-space math follows the usual spherical mercator convention:
//! a bbox edge is projected to pixels at 256 px per tile, and the east and
//! south edges are pulled in by one pixel so a box that ends exactly on a
//! tile boundary does not pick up the neighbouring row or column.

mod types;

pub use types::{
    Bounds, CoordError, TileRange, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON, MIN_ZOOM,
    TILE_SIZE, WORLD_BOUNDS,
};

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Projects a geographic position to global pixel coordinates at `zoom`.
///
/// Latitude is clamped to the projection's valid range, and the result is
/// clamped to the world's pixel extent.
#[inline]
fn to_pixel(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let size = TILE_SIZE * 2.0_f64.powi(zoom as i32);
    let half = size / 2.0;
    let per_degree = size / 360.0;
    let per_radian = size / (2.0 * PI);

    let sin_lat = (lat * PI / 180.0).sin().clamp(-0.9999, 0.9999);
    let x = (half + lon * per_degree).round();
    let y = (half - 0.5 * ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() * per_radian).round();

    (x.clamp(0.0, size), y.clamp(0.0, size))
}

/// Computes the tiles intersecting `bounds` at `zoom`.
///
/// # Errors
///
/// Returns an error if the zoom is above [`MAX_ZOOM`] or the bounds are invalid.
pub fn tile_range(bounds: &Bounds, zoom: u8) -> Result<TileRange, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    bounds.validate()?;

    let (ll_x, ll_y) = to_pixel(bounds.west, bounds.south, zoom);
    let (ur_x, ur_y) = to_pixel(bounds.east, bounds.north, zoom);

    let xs = [
        (ll_x / TILE_SIZE).floor() as i64,
        ((ur_x - 1.0) / TILE_SIZE).floor() as i64,
    ];
    let ys = [
        (ur_y / TILE_SIZE).floor() as i64,
        ((ll_y - 1.0) / TILE_SIZE).floor() as i64,
    ];

    let last = (1i64 << zoom) - 1;
    let clamp = |v: i64| v.clamp(0, last) as u32;

    Ok(TileRange {
        min_x: clamp(xs[0].min(xs[1])),
        min_y: clamp(ys[0].min(ys[1])),
        max_x: clamp(xs[0].max(xs[1])),
        max_y: clamp(ys[0].max(ys[1])),
    })
}

/// Tile ranges for a contiguous span of zoom levels.
///
/// This is the per-zoom bounds table the schemes consult: the scanline
/// cursor walks it in order, and pyramid descent clips children and counts
/// pruned subtrees against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRanges {
    minzoom: u8,
    ranges: Vec<TileRange>,
}

impl TileRanges {
    /// Computes ranges for every zoom in `minzoom..=maxzoom`.
    pub fn new(bounds: &Bounds, minzoom: u8, maxzoom: u8) -> Result<Self, CoordError> {
        if maxzoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(maxzoom));
        }
        let ranges = (minzoom..=maxzoom)
            .map(|z| tile_range(bounds, z))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { minzoom, ranges })
    }

    pub fn minzoom(&self) -> u8 {
        self.minzoom
    }

    pub fn maxzoom(&self) -> u8 {
        self.minzoom + self.ranges.len().saturating_sub(1) as u8
    }

    /// Returns the range at `zoom`, or `None` outside the covered span.
    #[inline]
    pub fn get(&self, zoom: u8) -> Option<&TileRange> {
        zoom.checked_sub(self.minzoom)
            .and_then(|i| self.ranges.get(i as usize))
    }

    /// Total tile count across all covered zoom levels.
    pub fn total(&self) -> u64 {
        self.ranges.iter().map(TileRange::count).sum()
    }

    /// Returns a copy covering only `minzoom..=maxzoom` of this table.
    pub fn truncated(&self, maxzoom: u8) -> Self {
        let keep = maxzoom.saturating_sub(self.minzoom) as usize + 1;
        Self {
            minzoom: self.minzoom,
            ranges: self.ranges.iter().take(keep).copied().collect(),
        }
    }

    /// Checks that the table stays within [`MAX_ZOOM`] and every non-empty
    /// range lies on the grid of its zoom.
    ///
    /// Tables from [`TileRanges::new`] always pass. Tables read back from a
    /// checkpoint may not.
    pub fn validate(&self) -> Result<(), CoordError> {
        let maxzoom = self.minzoom as usize + self.ranges.len().saturating_sub(1);
        if maxzoom > MAX_ZOOM as usize {
            return Err(CoordError::InvalidZoom(maxzoom.min(u8::MAX as usize) as u8));
        }
        for (zoom, range) in self.iter() {
            let side = 1u64 << zoom;
            if !range.is_empty() && (range.max_x as u64 >= side || range.max_y as u64 >= side) {
                return Err(CoordError::RangeOffGrid {
                    zoom,
                    range: *range,
                });
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &TileRange)> {
        let minzoom = self.minzoom;
        self.ranges
            .iter()
            .enumerate()
            .map(move |(i, r)| (minzoom + i as u8, r))
    }
}
