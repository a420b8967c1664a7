//! Geographic utilities: great-circle distance, web-map pixel scales and
//! geohash precision selection.

use std::f64::consts::PI;

use crate::GeoPoint;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_MEAN_RADIUS: f64 = 6_371_008.7714;
/// WGS84 semi-major axis in meters.
pub const EARTH_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
/// WGS84 semi-minor axis in meters.
pub const EARTH_SEMI_MINOR_AXIS: f64 = 6_356_752.314245;
/// Length of the equator in meters.
pub const EARTH_EQUATOR: f64 = 2.0 * PI * EARTH_SEMI_MAJOR_AXIS;
/// Pole-to-pole distance in meters.
pub const EARTH_POLAR_DISTANCE: f64 = PI * EARTH_SEMI_MINOR_AXIS;
/// Side of a web-map tile in pixels.
pub const TILE_SIZE: f64 = 256.0;
/// Longest geohash supported by packed cell keys.
pub const MAX_GEOHASH_PRECISION: u8 = 12;
/// Largest zoom accepted by the pixel conversions.
pub const MAX_ZOOM: u32 = 32;

/// Great-circle distance between two points in meters (haversine, mean radius).
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_MEAN_RADIUS * h.sqrt().asin()
}

/// Ground resolution of one pixel at `zoom` and latitude `lat`.
pub fn meters_per_pixel(zoom: u32, lat: f64) -> f64 {
    (EARTH_EQUATOR / TILE_SIZE) * lat.to_radians().cos() / 2f64.powi(zoom as i32)
}

/// Shortest geohash whose cells are no smaller than `meters`.
///
/// Zero returns the finest precision; anything wider than the equator
/// returns 1.
pub fn geohash_levels_for_distance(meters: f64) -> u8 {
    if !(meters > 0.0) {
        return MAX_GEOHASH_PRECISION;
    }

    let ratio = 1.0 + (EARTH_POLAR_DISTANCE / EARTH_EQUATOR);
    let width = (meters * meters / (ratio * ratio)).sqrt();
    let part = (EARTH_EQUATOR / width).ceil();
    if part <= 1.0 {
        return 1;
    }

    // Geohash alternates lon/lat bits: each 5-bit character halves the
    // cell 3 times on one axis and 2 times on the other.
    let bits = part.log2().ceil() as u32;
    let full = bits / 5;
    let left = bits - full * 5;
    let even = full + u32::from(left > 0);
    let odd = full + u32::from(left > 3);

    (even + odd).clamp(1, MAX_GEOHASH_PRECISION as u32) as u8
}

/// Geohash precision used to bucket a point for a `distance`-pixel cluster
/// radius at `zoom`. One level coarser than the exact fit to favor merging.
pub fn cell_precision(zoom: u32, distance: u32, lat: f64) -> u8 {
    let precision = geohash_levels_for_distance(distance as f64 * meters_per_pixel(zoom, lat));
    if precision > 1 {
        precision - 1
    } else {
        precision
    }
}

/// Angular size of one pixel in degrees at `zoom`.
pub fn tolerance_for_zoom(zoom: u32) -> f64 {
    360.0 / (TILE_SIZE * 2f64.powi(zoom as i32))
}
