//! Coordinate conversion module
//!
//! Converts geographic bounding boxes into slippy-map tile index ranges:
//! zoom level `z` has 2^z x 2^z tiles with the origin at the top-left
//! (north-west) corner of the grid.

mod types;

pub use types::{BoundingBox, CoordError, TileRange, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON};

use std::f64::consts::PI;

/// Converts a longitude to a tile column at the given zoom level.
///
/// The raw value is clamped into `[0, 2^zoom - 1]` so the eastern grid edge
/// (lon = 180) maps onto the last column instead of one past it.
#[inline]
fn lon_to_col(lon: f64, zoom: u8) -> u32 {
    let n = 1u64 << zoom;
    let raw = ((lon + 180.0) / 360.0 * n as f64).floor();
    clamp_index(raw, n)
}

/// Converts a latitude to a tile row at the given zoom level.
///
/// Uses the Web Mercator row formula `floor(n (1 - ln(tan φ + sec φ)/π)/2)`.
/// The grid origin is top-left, so larger latitudes give smaller rows. The
/// formula diverges towards the poles; clamping keeps rows on the grid.
#[inline]
fn lat_to_row(lat: f64, zoom: u8) -> u32 {
    let n = 1u64 << zoom;
    let lat_rad = lat * PI / 180.0;
    let sec = 1.0 / lat_rad.cos();
    let mut raw = (n as f64 * (1.0 - (lat_rad.tan() + sec).ln() / PI) / 2.0).floor();
    if raw.is_nan() {
        // tan and sec cancel at lat = -90 and can round to a tiny negative,
        // making ln produce NaN; the south pole belongs to the bottom row.
        raw = f64::INFINITY;
    }
    clamp_index(raw, n)
}

#[inline]
fn clamp_index(raw: f64, n: u64) -> u32 {
    let max = (n - 1) as f64;
    raw.clamp(0.0, max) as u32
}

/// Computes the inclusive tile index range covering `bounds` at `zoom`.
///
/// Because the origin is top-left, the row for the maximum latitude is the
/// minimum row index and vice versa. A full-globe longitude span maps the
/// eastern edge to `2^zoom - 1` so the antimeridian seam column is not
/// counted twice.
///
/// This function is pure and deterministic: the counting pass and the task
/// generation pass call it with identical arguments and must agree exactly.
pub fn tile_range(zoom: u8, bounds: &BoundingBox) -> Result<TileRange, CoordError> {
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }
    bounds.validate()?;

    let n = 1u64 << zoom;
    let x_min = lon_to_col(bounds.min_lon, zoom);
    let x_max = if bounds.is_full_lon_span() {
        (n - 1) as u32
    } else {
        lon_to_col(bounds.max_lon, zoom)
    };

    // Top-left origin: max latitude gives the minimum row.
    let y_min = lat_to_row(bounds.max_lat, zoom);
    let y_max = lat_to_row(bounds.min_lat, zoom);

    Ok(TileRange {
        x_min,
        y_min,
        x_max,
        y_max,
    })
}
