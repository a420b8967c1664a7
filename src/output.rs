//! JSON rendering of reduced results.
//!
//! Both families render as `{"buckets": [...]}`. Cluster buckets are keyed by
//! their geohash; shape buckets by their geometry in the requested format.

use log::warn;
use serde::Serialize;
use serde_json::Value;

use crate::bucket::{BucketPayload, ShardResult};
use crate::codec::GeometryCodec;
use crate::config::OutputFormat;
use crate::error::{AggregationError, Result};
use crate::shape::RealType;
use crate::sub_aggs::SubAggregations;
use crate::GeoPoint;

#[derive(Debug, Serialize)]
pub struct AggregationView<B> {
    pub buckets: Vec<B>,
}

#[derive(Debug, Serialize)]
pub struct ClusterBucketView<'a, S> {
    /// Geohash of the cell the cluster started from
    pub key: String,
    pub doc_count: u64,
    pub centroid: GeoPoint,
    /// Geohashes of every cell merged into the cluster
    pub cells: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<&'a S>,
}

#[derive(Debug, Serialize)]
pub struct ShapeBucketView<'a, S> {
    /// WKT or hex WKB string, or a GeoJSON object
    pub key: Value,
    pub digest: String,
    #[serde(rename = "type")]
    pub real_type: RealType,
    pub doc_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<&'a S>,
}

fn aggregations<S: SubAggregations>(sub_aggs: &S) -> Option<&S> {
    (!sub_aggs.is_empty()).then_some(sub_aggs)
}

/// View of a reduced cluster result.
pub fn cluster_view<S: SubAggregations>(
    result: &ShardResult<S>,
) -> AggregationView<ClusterBucketView<'_, S>> {
    let buckets = result
        .buckets
        .iter()
        .filter_map(|bucket| match &bucket.payload {
            BucketPayload::Cluster(cluster) => Some(ClusterBucketView {
                key: cluster.cell.to_geohash(),
                doc_count: bucket.doc_count,
                centroid: cluster.centroid,
                cells: cluster.member_cells.iter().map(|c| c.to_geohash()).collect(),
                aggregations: aggregations(&bucket.sub_aggs),
            }),
            BucketPayload::Shape(_) => None,
        })
        .collect();
    AggregationView { buckets }
}

/// View of a reduced shape result. Buckets whose geometry cannot be
/// rendered are left out with a warning.
pub fn shape_view<'a, S: SubAggregations>(
    result: &'a ShardResult<S>,
    codec: &dyn GeometryCodec,
    format: OutputFormat,
) -> AggregationView<ShapeBucketView<'a, S>> {
    let buckets = result
        .buckets
        .iter()
        .filter_map(|bucket| {
            let BucketPayload::Shape(shape) = &bucket.payload else {
                return None;
            };
            match render_key(&shape.geometry, codec, format) {
                Ok(key) => Some(ShapeBucketView {
                    key,
                    digest: shape.digest(),
                    real_type: shape.real_type,
                    doc_count: bucket.doc_count,
                    aggregations: aggregations(&bucket.sub_aggs),
                }),
                Err(e) => {
                    warn!("[Output] Skipping bucket {}: {}", shape.digest(), e);
                    None
                }
            }
        })
        .collect();
    AggregationView { buckets }
}

fn render_key(bytes: &[u8], codec: &dyn GeometryCodec, format: OutputFormat) -> Result<Value> {
    match format {
        OutputFormat::Wkb => Ok(Value::String(hex::encode(bytes))),
        OutputFormat::Wkt => {
            let geometry = codec.decode(bytes)?;
            codec.write_text(&geometry, format).map(Value::String)
        }
        OutputFormat::GeoJson => {
            let geometry = codec.decode(bytes)?;
            let text = codec.write_text(&geometry, format)?;
            serde_json::from_str(&text).map_err(encode_error)
        }
    }
}

fn encode_error(e: serde_json::Error) -> AggregationError {
    AggregationError::Encode {
        message: e.to_string(),
    }
}

/// Render a reduced cluster result as JSON.
pub fn render_clusters<S: SubAggregations>(result: &ShardResult<S>) -> Result<String> {
    serde_json::to_string(&cluster_view(result)).map_err(encode_error)
}

/// Render a reduced shape result as JSON.
pub fn render_shapes<S: SubAggregations>(
    result: &ShardResult<S>,
    codec: &dyn GeometryCodec,
    format: OutputFormat,
) -> Result<String> {
    serde_json::to_string(&shape_view(result, codec, format)).map_err(encode_error)
}
