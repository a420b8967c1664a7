//! Geometry codec seam.
//!
//! Shape buckets carry encoded geometry bytes (WKB by default). Everything
//! that needs to look inside them goes through [`GeometryCodec`], plus a few
//! pure helpers for hashing, classification and measuring.

use geo::{Coord, CoordsIter, Geometry, LineString, Polygon};
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo, ToJson, ToWkb, ToWkt};
use xxhash_rust::xxh3::xxh3_128;

use crate::config::OutputFormat;
use crate::error::{AggregationError, Result};

/// Decode, encode and text rendering of geometries.
pub trait GeometryCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Geometry<f64>>;

    fn encode(&self, geometry: &Geometry<f64>) -> Result<Vec<u8>>;

    /// Render in an output format. WKB output is hex encoded.
    fn write_text(&self, geometry: &Geometry<f64>, format: OutputFormat) -> Result<String>;
}

/// Two-dimensional WKB codec backed by geozero.
#[derive(Debug, Clone, Copy, Default)]
pub struct WkbCodec;

impl GeometryCodec for WkbCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Geometry<f64>> {
        if bytes.is_empty() {
            return Err(AggregationError::decode("empty geometry bytes"));
        }
        Wkb(bytes.to_vec())
            .to_geo()
            .map_err(|e| AggregationError::decode(e.to_string()))
    }

    fn encode(&self, geometry: &Geometry<f64>) -> Result<Vec<u8>> {
        geometry
            .to_wkb(CoordDimensions::xy())
            .map_err(|e| AggregationError::Encode {
                message: e.to_string(),
            })
    }

    fn write_text(&self, geometry: &Geometry<f64>, format: OutputFormat) -> Result<String> {
        let text = match format {
            OutputFormat::Wkt => geometry.to_wkt(),
            OutputFormat::GeoJson => geometry.to_json(),
            OutputFormat::Wkb => return self.encode(geometry).map(hex::encode),
        };
        text.map_err(|e| AggregationError::Encode {
            message: e.to_string(),
        })
    }
}

/// Stable 128-bit hash of encoded geometry bytes.
///
/// Identical bytes hash identically on every shard and every run.
pub fn content_hash(bytes: &[u8]) -> u128 {
    xxh3_128(bytes)
}

/// Whether the bytes are a WKB point, judged from the header alone.
///
/// Accepts ISO Z/M/ZM type codes and EWKB flag bits.
pub fn is_wkb_point(bytes: &[u8]) -> bool {
    if bytes.len() < 5 {
        return false;
    }
    let header = [bytes[1], bytes[2], bytes[3], bytes[4]];
    let raw = match bytes[0] {
        0 => u32::from_be_bytes(header),
        1 => u32::from_le_bytes(header),
        _ => return false,
    };
    (raw & 0x0fff_ffff) % 1000 == 1
}

/// Geometry type name as used in bucket output.
pub fn geometry_type(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Size proxy used for ranking: total boundary length in coordinate units.
///
/// Points have no extent and measure zero.
pub fn boundary_length(geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => 0.0,
        Geometry::Line(line) => {
            let delta = line.delta();
            delta.x.hypot(delta.y)
        }
        Geometry::LineString(line) => line_length(line),
        Geometry::MultiLineString(lines) => lines.0.iter().map(line_length).sum(),
        Geometry::Polygon(polygon) => polygon_boundary(polygon),
        Geometry::MultiPolygon(polygons) => polygons.0.iter().map(polygon_boundary).sum(),
        Geometry::Rect(rect) => polygon_boundary(&rect.to_polygon()),
        Geometry::Triangle(triangle) => polygon_boundary(&triangle.to_polygon()),
        Geometry::GeometryCollection(collection) => {
            collection.0.iter().map(boundary_length).sum()
        }
    }
}

/// First coordinate of a geometry, if it has any.
pub fn first_coord(geometry: &Geometry<f64>) -> Option<Coord<f64>> {
    geometry.coords_iter().next()
}

fn line_length(line: &LineString<f64>) -> f64 {
    line.lines()
        .map(|segment| {
            let delta = segment.delta();
            delta.x.hypot(delta.y)
        })
        .sum()
}

fn polygon_boundary(polygon: &Polygon<f64>) -> f64 {
    line_length(polygon.exterior()) + polygon.interiors().iter().map(line_length).sum::<f64>()
}

#[cfg(test)]
pub(crate) mod testing {
    use geo::{Geometry, LineString, Point, Polygon};

    use super::{GeometryCodec, WkbCodec};

    pub fn wkb(geometry: Geometry<f64>) -> Vec<u8> {
        WkbCodec.encode(&geometry).unwrap()
    }

    pub fn point_wkb(x: f64, y: f64) -> Vec<u8> {
        wkb(Geometry::Point(Point::new(x, y)))
    }

    /// Axis-aligned square with its lower-left corner at (x, y).
    pub fn square_wkb(x: f64, y: f64, side: f64) -> Vec<u8> {
        wkb(Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (x, y),
                (x + side, y),
                (x + side, y + side),
                (x, y + side),
                (x, y),
            ]),
            vec![],
        )))
    }

    pub fn line_wkb(coords: Vec<(f64, f64)>) -> Vec<u8> {
        wkb(Geometry::LineString(LineString::from(coords)))
    }
}
