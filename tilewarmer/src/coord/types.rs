//! Types for geodetic bounds and tile index ranges.

use serde::Deserialize;
use thiserror::Error;

/// Minimum valid longitude in degrees.
pub const MIN_LON: f64 = -180.0;

/// Maximum valid longitude in degrees.
pub const MAX_LON: f64 = 180.0;

/// Minimum valid latitude in degrees.
pub const MIN_LAT: f64 = -90.0;

/// Maximum valid latitude in degrees.
pub const MAX_LAT: f64 = 90.0;

/// Maximum supported zoom level.
///
/// At zoom 30 the grid is 2^30 tiles per axis, which is already far beyond
/// what any WMTS backend serves; the cap keeps tile indices inside `u32`.
pub const MAX_ZOOM: u8 = 30;

/// Errors produced by coordinate validation and conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Latitude outside [-90, 90].
    #[error("invalid latitude: {0} (must be within [-90, 90])")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180].
    #[error("invalid longitude: {0} (must be within [-180, 180])")]
    InvalidLongitude(f64),

    /// Zoom level above [`MAX_ZOOM`].
    #[error("invalid zoom level: {0} (must be <= {MAX_ZOOM})")]
    InvalidZoom(u8),

    /// Bounding box minimum exceeds its maximum on one axis.
    #[error("bounding box minimum exceeds maximum on the {0} axis")]
    BoundsOrder(&'static str),
}

/// A geographic bounding box in WGS84 degrees.
///
/// Field names accept the legacy configuration spelling
/// (`minx`/`miny`/`maxx`/`maxy`) when deserialized from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BoundingBox {
    /// Western edge in degrees.
    #[serde(rename = "minx")]
    pub min_lon: f64,

    /// Southern edge in degrees.
    #[serde(rename = "miny")]
    pub min_lat: f64,

    /// Eastern edge in degrees.
    #[serde(rename = "maxx")]
    pub max_lon: f64,

    /// Northern edge in degrees.
    #[serde(rename = "maxy")]
    pub max_lat: f64,
}

impl BoundingBox {
    /// Creates a validated bounding box.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, CoordError> {
        let bbox = Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Validates the box invariants: ordered edges within WGS84 limits.
    pub fn validate(&self) -> Result<(), CoordError> {
        for lon in [self.min_lon, self.max_lon] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        for lat in [self.min_lat, self.max_lat] {
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        if self.min_lon > self.max_lon {
            return Err(CoordError::BoundsOrder("longitude"));
        }
        if self.min_lat > self.max_lat {
            return Err(CoordError::BoundsOrder("latitude"));
        }
        Ok(())
    }

    /// True when the box spans the full longitude range.
    ///
    /// At the antimeridian, 180 and -180 degrees name the same meridian, so a
    /// full-span box must not count the seam column twice.
    pub fn is_full_lon_span(&self) -> bool {
        self.min_lon == MIN_LON && self.max_lon == MAX_LON
    }
}

/// An inclusive rectangle of tile indices at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    /// Westernmost tile column.
    pub x_min: u32,
    /// Northernmost tile row.
    pub y_min: u32,
    /// Easternmost tile column.
    pub x_max: u32,
    /// Southernmost tile row.
    pub y_max: u32,
}

impl TileRange {
    /// Number of (column, row) pairs covered by the range.
    pub fn tile_count(&self) -> u64 {
        let cols = u64::from(self.x_max - self.x_min) + 1;
        let rows = u64::from(self.y_max - self.y_min) + 1;
        cols * rows
    }
}
