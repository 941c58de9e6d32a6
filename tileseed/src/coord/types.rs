//! Coordinate type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Supported zoom levels. Tile columns and rows must fit in a `u32`.
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 30;

/// Pixel edge length of one tile, used for the pixel-space bounds math.
pub const TILE_SIZE: f64 = 256.0;

/// Full Web Mercator extent as `[west, south, east, north]`.
pub const WORLD_BOUNDS: Bounds = Bounds {
    west: -180.0,
    south: -85.0511,
    east: 180.0,
    north: 85.0511,
};

/// Geographic bounding box in degrees.
///
/// Serialized as the `[west, south, east, north]` array used by TileJSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Checks that every edge is inside the valid range and the box is not inverted.
    pub fn validate(&self) -> Result<(), CoordError> {
        for lon in [self.west, self.east] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        for lat in [self.south, self.north] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        if self.west > self.east || self.south > self.north {
            return Err(CoordError::InvertedBounds(*self));
        }
        Ok(())
    }

    /// Returns the overlap of two boxes.
    ///
    /// The result may be inverted when the boxes are disjoint; `validate`
    /// reports that case.
    pub fn intersect(&self, other: &Bounds) -> Bounds {
        Bounds {
            west: self.west.max(other.west),
            south: self.south.max(other.south),
            east: self.east.min(other.east),
            north: self.north.min(other.north),
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        WORLD_BOUNDS
    }
}

impl From<[f64; 4]> for Bounds {
    fn from(v: [f64; 4]) -> Self {
        Bounds::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Bounds> for [f64; 4] {
    fn from(b: Bounds) -> Self {
        [b.west, b.south, b.east, b.north]
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.west, self.south, self.east, self.north
        )
    }
}

/// Inclusive rectangle of tile columns and rows at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Number of tiles in the range.
    pub fn count(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        ((self.max_x - self.min_x) as u64 + 1) * ((self.max_y - self.min_y) as u64 + 1)
    }

    /// Clips an inclusive span of columns and rows to this range.
    ///
    /// Spans are `u64` because descendant spans deep in the pyramid can
    /// exceed `u32` before clipping.
    pub fn clip(&self, x0: u64, x1: u64, y0: u64, y1: u64) -> u64 {
        let lo_x = x0.max(self.min_x as u64);
        let hi_x = x1.min(self.max_x as u64);
        let lo_y = y0.max(self.min_y as u64);
        let hi_y = y1.min(self.max_y as u64);
        if self.is_empty() || lo_x > hi_x || lo_y > hi_y {
            return 0;
        }
        (hi_x - lo_x + 1) * (hi_y - lo_y + 1)
    }
}

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordError {
    /// Latitude is outside valid range (-90.0 to 90.0)
    InvalidLatitude(f64),
    /// Longitude is outside valid range (-180.0 to 180.0)
    InvalidLongitude(f64),
    /// Zoom level is outside valid range (0 to 30)
    InvalidZoom(u8),
    /// West edge is east of the east edge, or south is north of north
    InvertedBounds(Bounds),
    /// Tile range reaches past the grid at its zoom
    RangeOffGrid { zoom: u8, range: TileRange },
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::InvalidLatitude(lat) => {
                write!(f, "Invalid latitude: {} (must be between -90 and 90)", lat)
            }
            CoordError::InvalidLongitude(lon) => {
                write!(
                    f,
                    "Invalid longitude: {} (must be between {} and {})",
                    lon, MIN_LON, MAX_LON
                )
            }
            CoordError::InvalidZoom(zoom) => {
                write!(
                    f,
                    "Invalid zoom level: {} (must be between {} and {})",
                    zoom, MIN_ZOOM, MAX_ZOOM
                )
            }
            CoordError::InvertedBounds(bounds) => {
                write!(f, "Inverted bounds: {} (expected west <= east, south <= north)", bounds)
            }
            CoordError::RangeOffGrid { zoom, range } => {
                write!(
                    f,
                    "Tile range x {}..={}, y {}..={} is off the grid at zoom {}",
                    range.min_x, range.max_x, range.min_y, range.max_y, zoom
                )
            }
        }
    }
}

impl std::error::Error for CoordError {}
