//! Per-segment collection of point geometries into geohash cell buckets.

use log::{debug, warn};

use super::ClusterPayload;
use crate::bucket::{Bucket, BucketPayload, ShardResult};
use crate::config::ClusterAggregationConfig;
use crate::geo_utils::cell_precision;
use crate::ordinals::BucketOrdinalTable;
use crate::sub_aggs::SubAggregations;
use crate::{CellKey, Extent, GeoPoint};

/// Accumulated state of one cell.
#[derive(Debug, Clone)]
struct CellState<S> {
    extent: Extent,
    doc_count: u64,
    sub_aggs: S,
}

/// Collects points of one segment (or one shard) into cell buckets.
///
/// A collector is owned by exactly one unit of work; segments of the same
/// shard are combined with [`merge_from`](Self::merge_from) before
/// [`finish`](Self::finish).
#[derive(Debug)]
pub struct GeoPointClusterCollector<S: SubAggregations = ()> {
    zoom: u32,
    distance: u32,
    ordinals: BucketOrdinalTable<CellKey>,
    cells: Vec<CellState<S>>,
    total_doc_count: u64,
    skipped_points: u64,
}

impl<S: SubAggregations> GeoPointClusterCollector<S> {
    pub fn new(config: &ClusterAggregationConfig) -> Self {
        Self {
            zoom: config.zoom,
            distance: config.distance,
            ordinals: BucketOrdinalTable::new(),
            cells: Vec::new(),
            total_doc_count: 0,
            skipped_points: 0,
        }
    }

    /// Collect one document's points.
    pub fn collect(&mut self, points: &[GeoPoint]) {
        self.collect_with(points, |_| {});
    }

    /// Collect one document's points, letting `update` fold the document
    /// into the sub-aggregation state of every cell it lands in.
    ///
    /// Multi-valued documents contribute once per point.
    pub fn collect_with<F>(&mut self, points: &[GeoPoint], mut update: F)
    where
        F: FnMut(&mut S),
    {
        self.total_doc_count += 1;

        for point in points {
            if !point.is_valid() {
                self.skipped_points += 1;
                continue;
            }

            let precision = cell_precision(self.zoom, self.distance, point.lat);
            let cell = match CellKey::encode(point, precision) {
                Ok(cell) => cell,
                Err(e) => {
                    warn!("[ClusterCollector] Skipping point {:?}: {}", point, e);
                    self.skipped_points += 1;
                    continue;
                }
            };

            let (ordinal, is_new) = self.ordinals.add_or_get(&cell);
            if is_new {
                self.cells.push(CellState {
                    extent: Extent::from_point(point),
                    doc_count: 1,
                    sub_aggs: S::default(),
                });
            } else {
                let state = &mut self.cells[ordinal];
                state.extent.extend(point);
                state.doc_count += 1;
            }
            update(&mut self.cells[ordinal].sub_aggs);
        }
    }

    /// Fold another collector of the same shard into this one.
    pub fn merge_from(&mut self, other: GeoPointClusterCollector<S>) {
        self.total_doc_count += other.total_doc_count;
        self.skipped_points += other.skipped_points;

        for (cell, state) in other.ordinals.into_keys().into_iter().zip(other.cells) {
            let (ordinal, is_new) = self.ordinals.add_or_get(&cell);
            if is_new {
                self.cells.push(state);
            } else {
                let existing = &mut self.cells[ordinal];
                existing.extent = existing.extent.union(&state.extent);
                existing.doc_count += state.doc_count;
                let merged = S::reduce(vec![std::mem::take(&mut existing.sub_aggs), state.sub_aggs]);
                existing.sub_aggs = merged;
            }
        }
    }

    /// Number of distinct cells seen so far.
    pub fn bucket_count(&self) -> usize {
        self.ordinals.len()
    }

    /// Points ignored because they were invalid.
    pub fn skipped_points(&self) -> u64 {
        self.skipped_points
    }

    /// Freeze into a shard result with one bucket per cell, ordered by cell.
    pub fn finish(self) -> ShardResult<S> {
        let mut buckets: Vec<Bucket<S>> = self
            .ordinals
            .into_keys()
            .into_iter()
            .zip(self.cells)
            .map(|(cell, state)| Bucket {
                doc_count: state.doc_count,
                sub_aggs: state.sub_aggs,
                payload: BucketPayload::Cluster(ClusterPayload::for_cell(cell, state.extent)),
            })
            .collect();
        buckets.sort_by_key(|b| b.cluster().map(|c| c.cell));

        debug!(
            "[ClusterCollector] Finished {} cells from {} docs ({} points skipped)",
            buckets.len(),
            self.total_doc_count,
            self.skipped_points
        );

        ShardResult::new(buckets, self.total_doc_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sub_aggs::testing::ValueSum;

    fn config() -> ClusterAggregationConfig {
        ClusterAggregationConfig {
            zoom: 1,
            distance: 50,
        }
    }

    #[test]
    fn test_same_cell_accumulates_extent() {
        let mut collector: GeoPointClusterCollector = GeoPointClusterCollector::new(&config());
        collector.collect(&[GeoPoint::new(10.0, 10.0)]);
        collector.collect(&[GeoPoint::new(12.0, 16.0)]);

        let result = collector.finish();
        assert_eq!(result.buckets.len(), 1);
        assert_eq!(result.total_doc_count, 2);

        let bucket = &result.buckets[0];
        assert_eq!(bucket.doc_count, 2);
        let cluster = bucket.cluster().unwrap();
        // Midpoint of the extent, not the mean of the points
        assert_eq!(cluster.centroid, GeoPoint::new(11.0, 13.0));
        assert_eq!(cluster.member_cells.len(), 1);
        assert!(cluster.member_cells.contains(&cluster.cell));
    }

    #[test]
    fn test_multi_valued_documents_fan_out() {
        let mut collector: GeoPointClusterCollector = GeoPointClusterCollector::new(&config());
        collector.collect(&[GeoPoint::new(10.0, 10.0), GeoPoint::new(-30.0, -100.0)]);

        let result = collector.finish();
        assert_eq!(result.buckets.len(), 2);
        assert_eq!(result.total_doc_count, 1);
        assert_eq!(result.bucketed_doc_count(), 2);
    }

    #[test]
    fn test_invalid_points_skipped() {
        let mut collector: GeoPointClusterCollector = GeoPointClusterCollector::new(&config());
        collector.collect(&[GeoPoint::new(f64::NAN, 0.0), GeoPoint::new(95.0, 0.0)]);
        assert_eq!(collector.skipped_points(), 2);
        assert_eq!(collector.bucket_count(), 0);
    }

    #[test]
    fn test_sub_aggs_follow_contributions() {
        let mut collector: GeoPointClusterCollector<ValueSum> =
            GeoPointClusterCollector::new(&config());
        collector.collect_with(&[GeoPoint::new(10.0, 10.0)], |s| s.sum += 3);
        collector.collect_with(&[GeoPoint::new(11.0, 11.0)], |s| s.sum += 4);

        let result = collector.finish();
        assert_eq!(result.buckets[0].sub_aggs, ValueSum { sum: 7 });
    }

    #[test]
    fn test_merge_segments() {
        let mut a: GeoPointClusterCollector<ValueSum> = GeoPointClusterCollector::new(&config());
        a.collect_with(&[GeoPoint::new(10.0, 10.0)], |s| s.sum += 1);
        let mut b: GeoPointClusterCollector<ValueSum> = GeoPointClusterCollector::new(&config());
        b.collect_with(&[GeoPoint::new(20.0, 20.0)], |s| s.sum += 2);
        b.collect_with(&[GeoPoint::new(-40.0, 120.0)], |s| s.sum += 5);

        a.merge_from(b);
        let result = a.finish();

        assert_eq!(result.total_doc_count, 3);
        assert_eq!(result.buckets.len(), 2);
        let shared = result
            .buckets
            .iter()
            .find(|b| b.doc_count == 2)
            .unwrap();
        assert_eq!(shared.sub_aggs, ValueSum { sum: 3 });
        assert_eq!(shared.cluster().unwrap().centroid, GeoPoint::new(15.0, 15.0));
    }

    #[test]
    fn test_finish_orders_by_cell() {
        let mut collector: GeoPointClusterCollector = GeoPointClusterCollector::new(&config());
        collector.collect(&[GeoPoint::new(40.0, 170.0)]);
        collector.collect(&[GeoPoint::new(-40.0, -170.0)]);
        collector.collect(&[GeoPoint::new(10.0, 10.0)]);

        let cells: Vec<CellKey> = collector
            .finish()
            .buckets
            .iter()
            .map(|b| b.cluster().unwrap().cell)
            .collect();
        let mut sorted = cells.clone();
        sorted.sort();
        assert_eq!(cells, sorted);
    }
}
