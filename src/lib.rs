//! # Geo Aggregations
//!
//! Scatter-gather spatial aggregations over a sharded collection of geometries.
//!
//! This library provides:
//! - Adaptive geohash clustering of point geometries, merged across shards
//!   and then across adjacent cells at a zoom-relative pixel radius
//! - Top-ranked, deduplicated aggregation of line and polygon geometries,
//!   with zoom-aware simplification of the winners
//!
//! Each segment of a shard collects partial buckets, the shard finalizes them
//! into a [`ShardResult`], and a coordinator reduces shard results into the
//! final answer, either in one step or as a tree of partial reductions.
//!
//! ## Features
//!
//! - **`parallel`** - Collect the segments of a shard in parallel with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use geo_aggregations::{
//!     ClusterAggregationConfig, ClusterReducer, GeoPoint, GeoPointClusterCollector,
//!     ReduceContext,
//! };
//!
//! let config = ClusterAggregationConfig { zoom: 4, distance: 50 };
//!
//! let mut shard_a: GeoPointClusterCollector = GeoPointClusterCollector::new(&config);
//! shard_a.collect(&[GeoPoint::new(51.5074, -0.1278)]);
//! let mut shard_b: GeoPointClusterCollector = GeoPointClusterCollector::new(&config);
//! shard_b.collect(&[GeoPoint::new(51.5080, -0.1290)]);
//!
//! let reducer = ClusterReducer::new(&config);
//! let result = reducer
//!     .reduce(vec![shard_a.finish(), shard_b.finish()], &ReduceContext::terminal())
//!     .unwrap();
//! assert_eq!(result.buckets.len(), 1);
//! assert_eq!(result.buckets[0].doc_count, 2);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{AggregationError, OptionExt, Result};

// Geographic utilities (distance, pixel scales, geohash precision)
pub mod geo_utils;

// Packed geohash cell keys
pub mod geohash_key;
pub use geohash_key::CellKey;

// Dense key -> ordinal assignment for collectors
pub mod ordinals;
pub use ordinals::BucketOrdinalTable;

// Opaque nested sub-aggregation state
pub mod sub_aggs;
pub use sub_aggs::SubAggregations;

// Request configuration
pub mod config;
pub use config::{
    ClusterAggregationConfig, OutputFormat, ShapeAggregationConfig, SimplifyAlgorithm,
    SimplifyConfig,
};

// Bucket model shared by both aggregation families
pub mod bucket;
pub use bucket::{Bucket, BucketPayload, ReduceContext, Reducer, ShardResult};

// Geometry codec seam (WKB, WKT, GeoJSON)
pub mod codec;
pub use codec::{GeometryCodec, WkbCodec};

// Geohash point clustering
pub mod cluster;
pub use cluster::{
    ClusterPayload, ClusterReduceStats, ClusterReducer, GeoPointClusterCollector,
};

// Top-ranked shape aggregation
pub mod shape;
pub use shape::{
    BoundedShapeRanker, FinalizeStats, RealType, ShapeBucketCollector, ShapePayload, ShapeReducer,
    Simplifier,
};

// Shard execution, cancellation and coordinator gather
pub mod pipeline;
pub use pipeline::{
    collect_cluster_shard, collect_shape_shard, gather, tree_reduce, CancelFlag, GatheredResult,
    ShardFailure,
};

// Result tree rendering
pub mod output;

// ============================================================================
// Core Types
// ============================================================================

/// A point in longitude/latitude degrees.
///
/// # Example
/// ```
/// use geo_aggregations::GeoPoint;
/// let point = GeoPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Create a new point.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Bounding extent accumulated from points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Extent {
    /// Degenerate extent covering a single point.
    pub fn from_point(point: &GeoPoint) -> Self {
        Self {
            min_lat: point.lat,
            max_lat: point.lat,
            min_lon: point.lon,
            max_lon: point.lon,
        }
    }

    /// Grow the extent to cover `point`.
    pub fn extend(&mut self, point: &GeoPoint) {
        self.min_lat = self.min_lat.min(point.lat);
        self.max_lat = self.max_lat.max(point.lat);
        self.min_lon = self.min_lon.min(point.lon);
        self.max_lon = self.max_lon.max(point.lon);
    }

    /// Smallest extent covering both.
    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    /// Midpoint of the extent.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(51.5074, -0.1278).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_extent_accumulation() {
        let mut extent = Extent::from_point(&GeoPoint::new(1.0, 2.0));
        extent.extend(&GeoPoint::new(3.0, -2.0));

        assert_eq!(extent.center(), GeoPoint::new(2.0, 0.0));
        assert_eq!(extent.min_lon, -2.0);
        assert_eq!(extent.max_lat, 3.0);
    }

    #[test]
    fn test_extent_union() {
        let a = Extent::from_point(&GeoPoint::new(0.0, 0.0));
        let b = Extent::from_point(&GeoPoint::new(10.0, 20.0));
        let union = a.union(&b);

        assert_eq!(union.center(), GeoPoint::new(5.0, 10.0));
        assert_eq!(union, b.union(&a));
    }
}
