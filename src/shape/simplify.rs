//! Zoom-aware simplification of shape buckets.

use geo::{
    Area, Geometry, GeometryCollection, LineString, MultiLineString, MultiPolygon, Point, Polygon,
    Simplify, SimplifyVwPreserve,
};

use log::warn;

use super::{RealType, ShapePayload};
use crate::bucket::{Bucket, BucketPayload};
use crate::codec::{boundary_length, first_coord, GeometryCodec};
use crate::config::{SimplifyAlgorithm, SimplifyConfig};
use crate::error::{OptionExt, Result};

/// Outcome of simplifying one geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplifiedGeometry {
    pub geometry: Geometry<f64>,
    /// The shape collapsed and `geometry` is its first coordinate
    pub degenerate: bool,
}

/// Simplify `geometry` with `tolerance` (coordinate units).
///
/// Points pass through untouched. A shape that collapses to nothing is
/// replaced by a point at its first coordinate and flagged as degenerate.
pub fn simplify(
    geometry: &Geometry<f64>,
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
) -> SimplifiedGeometry {
    if matches!(geometry, Geometry::Point(_) | Geometry::MultiPoint(_)) || !(tolerance > 0.0) {
        return SimplifiedGeometry {
            geometry: geometry.clone(),
            degenerate: false,
        };
    }

    match simplify_geometry(geometry, tolerance, algorithm) {
        Some(simplified) => SimplifiedGeometry {
            geometry: simplified,
            degenerate: false,
        },
        None => match first_coord(geometry) {
            Some(coord) => SimplifiedGeometry {
                geometry: Geometry::Point(Point::from(coord)),
                degenerate: true,
            },
            // Nothing to fall back to: the input was already empty
            None => SimplifiedGeometry {
                geometry: geometry.clone(),
                degenerate: false,
            },
        },
    }
}

/// Simplified geometry, or `None` when nothing meaningful survives.
fn simplify_geometry(
    geometry: &Geometry<f64>,
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
) -> Option<Geometry<f64>> {
    match geometry {
        Geometry::Point(_) | Geometry::MultiPoint(_) => Some(geometry.clone()),
        Geometry::Line(line) => {
            simplify_line(&LineString::from(vec![line.start, line.end]), tolerance, algorithm)
                .map(Geometry::LineString)
        }
        Geometry::LineString(line) => {
            simplify_line(line, tolerance, algorithm).map(Geometry::LineString)
        }
        Geometry::Polygon(polygon) => {
            simplify_polygon(polygon, tolerance, algorithm).map(Geometry::Polygon)
        }
        Geometry::Rect(rect) => {
            simplify_polygon(&rect.to_polygon(), tolerance, algorithm).map(Geometry::Polygon)
        }
        Geometry::Triangle(triangle) => {
            simplify_polygon(&triangle.to_polygon(), tolerance, algorithm).map(Geometry::Polygon)
        }
        Geometry::MultiLineString(lines) => {
            let kept: Vec<LineString<f64>> = lines
                .0
                .iter()
                .filter_map(|line| simplify_line(line, tolerance, algorithm))
                .collect();
            (!kept.is_empty()).then(|| Geometry::MultiLineString(MultiLineString::new(kept)))
        }
        Geometry::MultiPolygon(polygons) => {
            let kept: Vec<Polygon<f64>> = polygons
                .0
                .iter()
                .filter_map(|polygon| simplify_polygon(polygon, tolerance, algorithm))
                .collect();
            (!kept.is_empty()).then(|| Geometry::MultiPolygon(MultiPolygon::new(kept)))
        }
        Geometry::GeometryCollection(collection) => {
            let kept: Vec<Geometry<f64>> = collection
                .0
                .iter()
                .filter_map(|member| simplify_geometry(member, tolerance, algorithm))
                .collect();
            (!kept.is_empty())
                .then(|| Geometry::GeometryCollection(GeometryCollection::new_from(kept)))
        }
    }
}

fn simplify_line(
    line: &LineString<f64>,
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
) -> Option<LineString<f64>> {
    let simplified = match algorithm {
        SimplifyAlgorithm::DouglasPeucker => line.simplify(&tolerance),
        // Visvalingam-Whyatt works on triangle areas
        SimplifyAlgorithm::TopologyPreserving => line.simplify_vw_preserve(&(tolerance * tolerance)),
    };
    (!is_degenerate_line(&simplified)).then_some(simplified)
}

fn simplify_polygon(
    polygon: &Polygon<f64>,
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
) -> Option<Polygon<f64>> {
    let simplified = match algorithm {
        SimplifyAlgorithm::DouglasPeucker => polygon.simplify(&tolerance),
        SimplifyAlgorithm::TopologyPreserving => {
            polygon.simplify_vw_preserve(&(tolerance * tolerance))
        }
    };
    (!is_degenerate_polygon(&simplified)).then_some(simplified)
}

fn is_degenerate_line(line: &LineString<f64>) -> bool {
    match line.0.first() {
        Some(first) => line.0.iter().all(|c| c == first),
        None => true,
    }
}

fn is_degenerate_polygon(polygon: &Polygon<f64>) -> bool {
    polygon.exterior().0.len() < 4 || polygon.unsigned_area() == 0.0
}

/// Simplifies shape buckets for a target zoom.
#[derive(Debug, Clone, Copy)]
pub struct Simplifier {
    tolerance: f64,
    algorithm: SimplifyAlgorithm,
}

impl Simplifier {
    pub fn new(tolerance: f64, algorithm: SimplifyAlgorithm) -> Self {
        Self {
            tolerance,
            algorithm,
        }
    }

    /// Tolerance of `pixel_tolerance` pixels at the configured zoom.
    pub fn from_config(config: &SimplifyConfig) -> Self {
        Self::new(config.tolerance(), config.algorithm)
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn simplify(&self, geometry: &Geometry<f64>) -> SimplifiedGeometry {
        simplify(geometry, self.tolerance, self.algorithm)
    }

    /// Simplify a bucket's geometry in place: replace the bytes, refresh the
    /// measure, and mark collapsed shapes as `SimplificationPoint`.
    ///
    /// The content hash is left alone so the bucket keeps its identity.
    pub fn simplify_payload(
        &self,
        payload: &mut ShapePayload,
        codec: &dyn GeometryCodec,
    ) -> Result<()> {
        if payload.simplified {
            return Ok(());
        }
        if matches!(
            payload.real_type,
            RealType::Point | RealType::SimplificationPoint
        ) {
            payload.simplified = true;
            return Ok(());
        }

        let geometry = codec.decode(&payload.geometry)?;
        let simplified = self.simplify(&geometry);
        if simplified.degenerate {
            let point = first_coord(&simplified.geometry).ok_or_decode("collapsed shape has no coordinate")?;
            payload.geometry = codec.encode(&Geometry::Point(Point::from(point)))?;
            payload.real_type = RealType::SimplificationPoint;
            payload.measure = 0.0;
        } else {
            payload.measure = boundary_length(&simplified.geometry);
            payload.geometry = codec.encode(&simplified.geometry)?;
        }
        payload.simplified = true;
        Ok(())
    }

    /// Simplify every shape bucket in place and return how many were
    /// dropped.
    ///
    /// A bucket failing with a recoverable error is dropped with a warning.
    /// Any other error aborts the pass.
    pub fn simplify_buckets<S>(
        &self,
        buckets: &mut Vec<Bucket<S>>,
        codec: &dyn GeometryCodec,
    ) -> Result<usize> {
        let mut kept = Vec::with_capacity(buckets.len());
        let mut dropped = 0;
        for mut bucket in buckets.drain(..) {
            if let BucketPayload::Shape(payload) = &mut bucket.payload {
                if let Err(e) = self.simplify_payload(payload, codec) {
                    if !e.is_recoverable() {
                        return Err(e);
                    }
                    warn!("[Simplifier] Dropping bucket {}: {}", payload.digest(), e);
                    dropped += 1;
                    continue;
                }
            }
            kept.push(bucket);
        }
        *buckets = kept;
        Ok(dropped)
    }
}
