//! Coordinator-side reduction of cluster buckets.
//!
//! Intermediate rounds only merge buckets of the same cell, which is
//! associative and commutative. The terminal round additionally merges
//! adjacent cells whose centroids are within the pixel radius, so flat and
//! tree reductions end in the same clusters.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use log::{debug, info};

use super::ClusterPayload;
use crate::bucket::{Bucket, BucketPayload, ReduceContext, Reducer, ShardResult};
use crate::config::ClusterAggregationConfig;
use crate::error::{AggregationError, Result};
use crate::geo_utils::{haversine_distance, meters_per_pixel};
use crate::sub_aggs::SubAggregations;
use crate::{CellKey, GeoPoint};

/// Counters from one reduce invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterReduceStats {
    /// Buckets across all inputs
    pub input_buckets: usize,
    /// Buckets left after same-cell merging
    pub cell_buckets: usize,
    /// Successful neighbor merges
    pub merges: usize,
    /// Full scans over the work list
    pub passes: usize,
}

/// A bucket pending merge during one reduce.
#[derive(Debug)]
struct Cluster<S> {
    doc_count: u64,
    sub_aggs: S,
    payload: ClusterPayload,
}

impl<S: SubAggregations> Cluster<S> {
    fn from_bucket(bucket: Bucket<S>) -> Result<Self> {
        match bucket.payload {
            BucketPayload::Cluster(payload) => Ok(Self {
                doc_count: bucket.doc_count,
                sub_aggs: bucket.sub_aggs,
                payload,
            }),
            BucketPayload::Shape(_) => Err(AggregationError::MismatchedBucket {
                expected: "cluster",
            }),
        }
    }

    fn into_bucket(self) -> Bucket<S> {
        Bucket {
            doc_count: self.doc_count,
            sub_aggs: self.sub_aggs,
            payload: BucketPayload::Cluster(self.payload),
        }
    }

    /// Absorb a neighboring cluster. The centroid moves to the doc-count
    /// weighted average of both centroids.
    fn absorb(&mut self, other: Cluster<S>) {
        let total = self.doc_count + other.doc_count;
        let a = self.payload.centroid;
        let b = other.payload.centroid;
        self.payload.centroid = if total > 0 {
            let wa = self.doc_count as f64 / total as f64;
            let wb = other.doc_count as f64 / total as f64;
            GeoPoint::new(a.lat * wa + b.lat * wb, a.lon * wa + b.lon * wb)
        } else {
            GeoPoint::new((a.lat + b.lat) / 2.0, (a.lon + b.lon) / 2.0)
        };

        self.payload.extent = self.payload.extent.union(&other.payload.extent);
        self.payload.member_cells.extend(other.payload.member_cells);
        self.doc_count = total;
        self.sub_aggs = S::reduce(vec![std::mem::take(&mut self.sub_aggs), other.sub_aggs]);
    }
}

/// Merge every bucket reported for the same cell. The centroid becomes the
/// midpoint of the union of their extents.
fn merge_cell_group<S: SubAggregations>(group: Vec<Cluster<S>>) -> Option<Cluster<S>> {
    let mut iter = group.into_iter();
    let mut merged = iter.next()?;
    let mut parts = vec![std::mem::take(&mut merged.sub_aggs)];

    for cluster in iter {
        merged.doc_count += cluster.doc_count;
        merged.payload.extent = merged.payload.extent.union(&cluster.payload.extent);
        merged.payload.member_cells.extend(cluster.payload.member_cells);
        parts.push(cluster.sub_aggs);
    }

    merged.sub_aggs = if parts.len() == 1 {
        parts.pop().unwrap_or_default()
    } else {
        S::reduce(parts)
    };
    merged.payload.centroid = merged.payload.extent.center();
    Some(merged)
}

/// Reduces cluster shard results.
#[derive(Debug, Clone)]
pub struct ClusterReducer {
    zoom: u32,
    distance: u32,
}

impl ClusterReducer {
    pub fn new(config: &ClusterAggregationConfig) -> Self {
        Self {
            zoom: config.zoom,
            distance: config.distance,
        }
    }

    /// Reduce shard results (or earlier rounds) into one result.
    ///
    /// Missing shards are not an error: whatever arrived is merged.
    pub fn reduce<S: SubAggregations>(
        &self,
        results: Vec<ShardResult<S>>,
        ctx: &ReduceContext,
    ) -> Result<ShardResult<S>> {
        self.reduce_with_stats(results, ctx).map(|(result, _)| result)
    }

    pub fn reduce_with_stats<S: SubAggregations>(
        &self,
        results: Vec<ShardResult<S>>,
        ctx: &ReduceContext,
    ) -> Result<(ShardResult<S>, ClusterReduceStats)> {
        let start = Instant::now();
        let mut stats = ClusterReduceStats::default();
        let mut total_doc_count = 0;

        let mut pending: BTreeMap<CellKey, Vec<Cluster<S>>> = BTreeMap::new();
        for result in results {
            total_doc_count += result.total_doc_count;
            for bucket in result.buckets {
                stats.input_buckets += 1;
                let cluster = Cluster::from_bucket(bucket)?;
                pending.entry(cluster.payload.cell).or_default().push(cluster);
            }
        }
        ctx.cancel.check()?;

        let mut live: BTreeMap<CellKey, Cluster<S>> = pending
            .into_iter()
            .filter_map(|(cell, group)| merge_cell_group(group).map(|c| (cell, c)))
            .collect();
        stats.cell_buckets = live.len();

        if ctx.final_reduce {
            self.merge_neighbors(&mut live, ctx, &mut stats)?;
            info!(
                "[ClusterReducer] {} buckets -> {} cells -> {} clusters ({} merges, {} passes) in {}ms",
                stats.input_buckets,
                stats.cell_buckets,
                live.len(),
                stats.merges,
                stats.passes,
                start.elapsed().as_millis()
            );
        } else {
            debug!(
                "[ClusterReducer] Partial reduce: {} buckets -> {} cells",
                stats.input_buckets, stats.cell_buckets
            );
        }

        let buckets = live.into_values().map(Cluster::into_bucket).collect();
        Ok((ShardResult::new(buckets, total_doc_count), stats))
    }

    /// Repeatedly scan the cells in key order, folding each cluster into the
    /// first adjacent cluster within range, until a pass merges nothing.
    ///
    /// Every merge removes one live cluster, so at most `n - 1` merges happen.
    fn merge_neighbors<S: SubAggregations>(
        &self,
        live: &mut BTreeMap<CellKey, Cluster<S>>,
        ctx: &ReduceContext,
        stats: &mut ClusterReduceStats,
    ) -> Result<()> {
        let order: Vec<CellKey> = live.keys().copied().collect();

        // Member cell -> key of the live cluster that owns it
        let mut owners: HashMap<CellKey, CellKey> = HashMap::with_capacity(order.len());
        for (key, cluster) in live.iter() {
            for member in &cluster.payload.member_cells {
                owners.insert(*member, *key);
            }
        }

        loop {
            ctx.cancel.check()?;
            stats.passes += 1;
            let mut merged_in_pass = false;

            for key in &order {
                let target = {
                    let view: &BTreeMap<CellKey, Cluster<S>> = live;
                    view.get(key)
                        .and_then(|cluster| self.find_merge_target(*key, cluster, view, &owners))
                };
                let Some(target) = target else {
                    continue;
                };
                let Some(absorbed) = live.remove(key) else {
                    continue;
                };
                match live.get_mut(&target) {
                    Some(host) => {
                        for member in &absorbed.payload.member_cells {
                            owners.insert(*member, target);
                        }
                        host.absorb(absorbed);
                        stats.merges += 1;
                        merged_in_pass = true;
                    }
                    None => {
                        live.insert(*key, absorbed);
                    }
                }
            }

            if !merged_in_pass {
                return Ok(());
            }
        }
    }

    /// First neighboring cluster (same precision, else the neighbor's parent
    /// cell) that does not already contain `key` and is within range.
    fn find_merge_target<S>(
        &self,
        key: CellKey,
        cluster: &Cluster<S>,
        live: &BTreeMap<CellKey, Cluster<S>>,
        owners: &HashMap<CellKey, CellKey>,
    ) -> Option<CellKey> {
        for neighbor in key.neighbors() {
            let owner = owners
                .get(&neighbor)
                .or_else(|| neighbor.parent().and_then(|parent| owners.get(&parent)));
            let Some(&owner) = owner else {
                continue;
            };
            if owner == key {
                continue;
            }
            let Some(host) = live.get(&owner) else {
                continue;
            };
            if host.payload.member_cells.contains(&key) {
                continue;
            }
            if self.within_distance(&cluster.payload.centroid, &host.payload.centroid) {
                return Some(owner);
            }
        }
        None
    }

    fn within_distance(&self, a: &GeoPoint, b: &GeoPoint) -> bool {
        let meters = haversine_distance(a, b);
        let resolution = meters_per_pixel(self.zoom, (a.lat + b.lat) / 2.0);
        if !(resolution > 0.0) {
            return meters == 0.0;
        }
        self.distance as f64 >= meters / resolution
    }
}

impl<S: SubAggregations> Reducer<S> for ClusterReducer {
    fn reduce(&self, results: Vec<ShardResult<S>>, ctx: &ReduceContext) -> Result<ShardResult<S>> {
        ClusterReducer::reduce(self, results, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::GeoPointClusterCollector;
    use crate::pipeline::CancelFlag;
    use crate::shape::{RealType, ShapePayload};
    use crate::sub_aggs::testing::ValueSum;

    fn shard(config: &ClusterAggregationConfig, points: &[(f64, f64)]) -> ShardResult<ValueSum> {
        let mut collector: GeoPointClusterCollector<ValueSum> =
            GeoPointClusterCollector::new(config);
        for (lat, lon) in points {
            collector.collect_with(&[GeoPoint::new(*lat, *lon)], |s| s.sum += 1);
        }
        collector.finish()
    }

    // zoom 10 / 100px buckets the equator into 4-character cells whose
    // boundary runs along lon 0.0
    fn equator_config() -> ClusterAggregationConfig {
        ClusterAggregationConfig {
            zoom: 10,
            distance: 100,
        }
    }

    #[test]
    fn test_same_cell_across_shards() {
        let config = ClusterAggregationConfig {
            zoom: 1,
            distance: 50,
        };
        let a = shard(&config, &[(10.0, 10.0), (10.0, 10.0), (10.0, 10.0)]);
        let b = shard(&config, &[(20.0, 20.0); 5]);

        let reducer = ClusterReducer::new(&config);
        let result = reducer.reduce(vec![a, b], &ReduceContext::terminal()).unwrap();

        assert_eq!(result.buckets.len(), 1);
        let bucket = &result.buckets[0];
        assert_eq!(bucket.doc_count, 8);
        assert_eq!(bucket.sub_aggs, ValueSum { sum: 8 });
        let centroid = bucket.cluster().unwrap().centroid;
        assert!((10.0..=20.0).contains(&centroid.lat));
        assert!((10.0..=20.0).contains(&centroid.lon));
    }

    #[test]
    fn test_adjacent_cells_merge_within_distance() {
        let config = equator_config();
        let a = shard(&config, &[(0.05, -0.01)]);
        let b = shard(&config, &[(0.05, 0.01), (0.05, 0.01), (0.05, 0.01)]);
        assert_ne!(
            a.buckets[0].cluster().unwrap().cell,
            b.buckets[0].cluster().unwrap().cell
        );

        let reducer = ClusterReducer::new(&config);
        let (result, stats) = reducer
            .reduce_with_stats(vec![a, b], &ReduceContext::terminal())
            .unwrap();

        assert_eq!(stats.cell_buckets, 2);
        assert_eq!(stats.merges, 1);
        assert_eq!(result.buckets.len(), 1);
        let bucket = &result.buckets[0];
        assert_eq!(bucket.doc_count, 4);
        let cluster = bucket.cluster().unwrap();
        assert_eq!(cluster.member_cells.len(), 2);
        // Weighted toward the heavier cell
        assert!((cluster.centroid.lon - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_adjacent_cells_too_far_apart() {
        let config = equator_config();
        let a = shard(&config, &[(0.05, -0.30)]);
        let b = shard(&config, &[(0.05, 0.30)]);

        let reducer = ClusterReducer::new(&config);
        let (result, stats) = reducer
            .reduce_with_stats(vec![a, b], &ReduceContext::terminal())
            .unwrap();

        assert_eq!(result.buckets.len(), 2);
        assert_eq!(stats.merges, 0);
        assert_eq!(stats.passes, 1);
    }

    #[test]
    fn test_intermediate_reduce_keeps_cells_apart() {
        let config = equator_config();
        let a = shard(&config, &[(0.05, -0.01)]);
        let b = shard(&config, &[(0.05, 0.01)]);

        let reducer = ClusterReducer::new(&config);
        let partial = reducer
            .reduce(vec![a, b], &ReduceContext::intermediate())
            .unwrap();
        assert_eq!(partial.buckets.len(), 2);

        let result = reducer
            .reduce(vec![partial], &ReduceContext::terminal())
            .unwrap();
        assert_eq!(result.buckets.len(), 1);
    }

    #[test]
    fn test_missing_shards_are_fine() {
        let reducer = ClusterReducer::new(&equator_config());
        let result: ShardResult<ValueSum> =
            reducer.reduce(vec![], &ReduceContext::terminal()).unwrap();
        assert!(result.buckets.is_empty());
        assert_eq!(result.total_doc_count, 0);
    }

    #[test]
    fn test_rejects_shape_buckets() {
        let reducer = ClusterReducer::new(&equator_config());
        let bucket: Bucket = Bucket {
            doc_count: 1,
            sub_aggs: (),
            payload: BucketPayload::Shape(ShapePayload {
                geometry: vec![],
                content_hash: 0,
                real_type: RealType::Point,
                measure: 0.0,
                simplified: false,
            }),
        };
        let err = reducer
            .reduce(vec![ShardResult::new(vec![bucket], 1)], &ReduceContext::terminal())
            .unwrap_err();
        assert_eq!(err, AggregationError::MismatchedBucket { expected: "cluster" });
    }

    #[test]
    fn test_cancelled_reduce() {
        let config = equator_config();
        let cancel = CancelFlag::default();
        cancel.cancel();

        let reducer = ClusterReducer::new(&config);
        let err = reducer
            .reduce(
                vec![shard(&config, &[(0.05, 0.01)])],
                &ReduceContext::terminal().with_cancel(cancel),
            )
            .unwrap_err();
        assert_eq!(err, AggregationError::Cancelled);
    }

    #[test]
    fn test_chain_of_cells_merges_at_most_n_minus_one() {
        let config = equator_config();
        // A dense row of points across several adjacent cells
        let points: Vec<(f64, f64)> = (0..40).map(|i| (0.05, -0.7 + i as f64 * 0.035)).collect();
        let input = shard(&config, &points);
        let cells = input.buckets.len();

        let reducer = ClusterReducer::new(&config);
        let (result, stats) = reducer
            .reduce_with_stats(vec![input], &ReduceContext::terminal())
            .unwrap();

        assert!(stats.merges <= cells - 1);
        assert_eq!(result.buckets.len(), cells - stats.merges);
        assert_eq!(result.bucketed_doc_count(), 40);
    }
}
