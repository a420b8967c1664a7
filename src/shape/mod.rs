//! # Top-Ranked Shape Aggregation
//!
//! Buckets non-point geometries by their exact encoded content and keeps the
//! largest ones.
//!
//! ## Algorithm
//! 1. Each segment counts encoded geometries per distinct byte content,
//!    ignoring a value identical to the one right before it in a document
//! 2. At shard finalize every bucket gets a content hash, a type and a size
//!    measure (boundary length), and only the top `shard_size` survive
//! 3. The coordinator merges buckets with the same content hash across
//!    shards and re-ranks: `required_size` on the terminal round,
//!    `shard_size` on intermediate rounds
//! 4. Winners are optionally simplified for the target zoom; shapes that
//!    collapse are replaced by their first coordinate

mod collector;
mod ranker;
mod reducer;
mod simplify;

use std::fmt;
use std::str::FromStr;

use geo::Geometry;
use serde::{Deserialize, Serialize};

use crate::error::{AggregationError, Result};

pub use collector::{FinalizeStats, ShapeBucketCollector};
pub use ranker::BoundedShapeRanker;
pub use reducer::ShapeReducer;
pub use simplify::{simplify, SimplifiedGeometry, Simplifier};

/// Geometry type of a shape bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RealType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    /// A shape that collapsed during simplification, reported as its first
    /// coordinate
    SimplificationPoint,
}

impl RealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealType::Point => "Point",
            RealType::LineString => "LineString",
            RealType::Polygon => "Polygon",
            RealType::MultiPoint => "MultiPoint",
            RealType::MultiLineString => "MultiLineString",
            RealType::MultiPolygon => "MultiPolygon",
            RealType::GeometryCollection => "GeometryCollection",
            RealType::SimplificationPoint => "SimplificationPoint",
        }
    }

    /// Classify a decoded geometry.
    pub fn classify(geometry: &Geometry<f64>) -> Result<Self> {
        crate::codec::geometry_type(geometry).parse()
    }
}

impl FromStr for RealType {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Point" => Ok(RealType::Point),
            "LineString" => Ok(RealType::LineString),
            "Polygon" => Ok(RealType::Polygon),
            "MultiPoint" => Ok(RealType::MultiPoint),
            "MultiLineString" => Ok(RealType::MultiLineString),
            "MultiPolygon" => Ok(RealType::MultiPolygon),
            "GeometryCollection" => Ok(RealType::GeometryCollection),
            "SimplificationPoint" => Ok(RealType::SimplificationPoint),
            other => Err(AggregationError::UnsupportedGeometry {
                geometry_type: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape-specific part of a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapePayload {
    /// Encoded geometry; replaced by the simplified encoding once simplified
    pub geometry: Vec<u8>,
    /// Hash of the originally collected bytes, the cross-shard identity
    pub content_hash: u128,
    pub real_type: RealType,
    /// Ranking measure (boundary length), zero for points
    pub measure: f64,
    /// Whether `geometry` already went through the simplifier
    pub simplified: bool,
}

impl ShapePayload {
    /// Hex rendering of the content hash.
    pub fn digest(&self) -> String {
        hex::encode(self.content_hash.to_be_bytes())
    }
}

#[cfg(test)]
mod tests {
    use geo::{Line, LineString, Point};

    use super::*;

    #[test]
    fn test_classify() {
        let line = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]));
        assert_eq!(RealType::classify(&line).unwrap(), RealType::LineString);
        assert_eq!(
            RealType::classify(&Geometry::Point(Point::new(1.0, 1.0))).unwrap(),
            RealType::Point
        );
    }

    #[test]
    fn test_unsupported_type() {
        let segment = Geometry::Line(Line::new((0.0, 0.0), (1.0, 1.0)));
        assert!(matches!(
            RealType::classify(&segment),
            Err(AggregationError::UnsupportedGeometry { ref geometry_type }) if geometry_type == "Line"
        ));
        assert!("Circle".parse::<RealType>().is_err());
    }

    #[test]
    fn test_digest_is_fixed_width() {
        let payload = ShapePayload {
            geometry: vec![],
            content_hash: 0xab,
            real_type: RealType::Polygon,
            measure: 0.0,
            simplified: false,
        };
        assert_eq!(payload.digest(), format!("{}ab", "0".repeat(30)));
    }
}
