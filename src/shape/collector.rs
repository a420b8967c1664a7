//! Per-segment collection of encoded geometries into content buckets.

use log::{debug, warn};

use super::{BoundedShapeRanker, RealType, ShapePayload, Simplifier};
use crate::bucket::{Bucket, BucketPayload, ShardResult};
use crate::codec::{boundary_length, content_hash, is_wkb_point, GeometryCodec};
use crate::error::Result;
use crate::ordinals::BucketOrdinalTable;
use crate::sub_aggs::SubAggregations;

/// Counters from one shard finalize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeStats {
    /// Distinct byte contents seen
    pub observed_buckets: usize,
    /// Buckets dropped because their bytes could not be decoded or classified
    pub dropped_buckets: usize,
    /// Buckets returned after ranking
    pub retained_buckets: usize,
}

#[derive(Debug, Clone)]
struct ContentState<S> {
    doc_count: u64,
    sub_aggs: S,
}

/// Collects encoded geometries of one segment (or one shard), keyed by their
/// exact bytes.
#[derive(Debug)]
pub struct ShapeBucketCollector<S: SubAggregations = ()> {
    ordinals: BucketOrdinalTable<Vec<u8>>,
    states: Vec<ContentState<S>>,
    total_doc_count: u64,
}

impl<S: SubAggregations> Default for ShapeBucketCollector<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SubAggregations> ShapeBucketCollector<S> {
    pub fn new() -> Self {
        Self {
            ordinals: BucketOrdinalTable::new(),
            states: Vec::new(),
            total_doc_count: 0,
        }
    }

    /// Collect one document's values in document order.
    pub fn collect<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        self.collect_with(values, |_| {});
    }

    /// Collect one document's values, folding the document into the
    /// sub-aggregation state of every bucket it counts towards.
    ///
    /// A value identical to the one right before it is skipped. Only
    /// adjacent repeats are skipped: `[A, A, B, A]` counts A twice.
    pub fn collect_with<'a, I, F>(&mut self, values: I, mut update: F)
    where
        I: IntoIterator<Item = &'a [u8]>,
        F: FnMut(&mut S),
    {
        self.total_doc_count += 1;

        let mut previous: Option<&[u8]> = None;
        for value in values {
            if previous == Some(value) {
                continue;
            }
            previous = Some(value);

            let (ordinal, is_new) = self.ordinals.add_or_get(value);
            if is_new {
                self.states.push(ContentState {
                    doc_count: 1,
                    sub_aggs: S::default(),
                });
            } else {
                self.states[ordinal].doc_count += 1;
            }
            update(&mut self.states[ordinal].sub_aggs);
        }
    }

    /// Fold another collector of the same shard into this one.
    pub fn merge_from(&mut self, other: ShapeBucketCollector<S>) {
        self.total_doc_count += other.total_doc_count;

        for (bytes, state) in other.ordinals.into_keys().into_iter().zip(other.states) {
            let (ordinal, is_new) = self.ordinals.add_or_get(&bytes);
            if is_new {
                self.states.push(state);
            } else {
                let existing = &mut self.states[ordinal];
                existing.doc_count += state.doc_count;
                existing.sub_aggs =
                    S::reduce(vec![std::mem::take(&mut existing.sub_aggs), state.sub_aggs]);
            }
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.ordinals.len()
    }

    pub fn total_doc_count(&self) -> u64 {
        self.total_doc_count
    }

    /// Freeze into a shard result holding the top `shard_size` buckets.
    pub fn finish(
        self,
        codec: &dyn GeometryCodec,
        shard_size: usize,
        simplifier: Option<&Simplifier>,
    ) -> Result<ShardResult<S>> {
        Ok(self.finish_with_stats(codec, shard_size, simplifier)?.0)
    }

    /// Hash, classify and measure every bucket, keep the top `shard_size`,
    /// then simplify the survivors.
    ///
    /// Buckets whose bytes fail to decode or classify are dropped with a
    /// warning. Errors that are not recoverable fail the whole shard.
    pub fn finish_with_stats(
        self,
        codec: &dyn GeometryCodec,
        shard_size: usize,
        simplifier: Option<&Simplifier>,
    ) -> Result<(ShardResult<S>, FinalizeStats)> {
        let mut stats = FinalizeStats {
            observed_buckets: self.ordinals.len(),
            ..Default::default()
        };

        let mut candidates = Vec::with_capacity(self.states.len());
        for (bytes, state) in self.ordinals.into_keys().into_iter().zip(self.states) {
            match describe(codec, bytes) {
                Ok(payload) => candidates.push(Bucket {
                    doc_count: state.doc_count,
                    sub_aggs: state.sub_aggs,
                    payload: BucketPayload::Shape(payload),
                }),
                Err(e) if e.is_recoverable() => {
                    warn!("[ShapeCollector] Dropping bucket: {}", e);
                    stats.dropped_buckets += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let mut buckets = BoundedShapeRanker::new(shard_size).select(candidates);

        if let Some(simplifier) = simplifier {
            stats.dropped_buckets += simplifier.simplify_buckets(&mut buckets, codec)?;
        }
        stats.retained_buckets = buckets.len();

        debug!(
            "[ShapeCollector] Finished {} of {} buckets from {} docs ({} dropped)",
            stats.retained_buckets, stats.observed_buckets, self.total_doc_count, stats.dropped_buckets
        );

        Ok((ShardResult::new(buckets, self.total_doc_count), stats))
    }
}

/// Build the payload for one distinct byte content. Points are recognized
/// from the header alone.
fn describe(codec: &dyn GeometryCodec, bytes: Vec<u8>) -> Result<ShapePayload> {
    let hash = content_hash(&bytes);
    if is_wkb_point(&bytes) {
        return Ok(ShapePayload {
            geometry: bytes,
            content_hash: hash,
            real_type: RealType::Point,
            measure: 0.0,
            simplified: false,
        });
    }

    let geometry = codec.decode(&bytes)?;
    let real_type = RealType::classify(&geometry)?;
    Ok(ShapePayload {
        geometry: bytes,
        content_hash: hash,
        real_type,
        measure: boundary_length(&geometry),
        simplified: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{line_wkb, point_wkb, square_wkb};
    use crate::codec::WkbCodec;
    use crate::config::{OutputFormat, SimplifyAlgorithm};
    use crate::error::AggregationError;
    use crate::sub_aggs::testing::ValueSum;

    /// Decodes like WKB but cannot write anything back.
    struct ReadOnlyCodec;

    impl GeometryCodec for ReadOnlyCodec {
        fn decode(&self, bytes: &[u8]) -> Result<geo::Geometry<f64>> {
            WkbCodec.decode(bytes)
        }

        fn encode(&self, _geometry: &geo::Geometry<f64>) -> Result<Vec<u8>> {
            Err(AggregationError::Encode {
                message: "read-only codec".to_string(),
            })
        }

        fn write_text(&self, _geometry: &geo::Geometry<f64>, _format: OutputFormat) -> Result<String> {
            Err(AggregationError::Encode {
                message: "read-only codec".to_string(),
            })
        }
    }

    fn doc_count_of(result: &ShardResult<impl SubAggregations>, bytes: &[u8]) -> Option<u64> {
        let hash = content_hash(bytes);
        result
            .buckets
            .iter()
            .find(|b| b.shape().map(|s| s.content_hash) == Some(hash))
            .map(|b| b.doc_count)
    }

    #[test]
    fn test_adjacent_dedup_only() {
        let a = square_wkb(0.0, 0.0, 1.0);
        let b = square_wkb(5.0, 5.0, 1.0);

        let mut collector: ShapeBucketCollector = ShapeBucketCollector::new();
        collector.collect([a.as_slice(), a.as_slice(), b.as_slice(), a.as_slice()]);

        let result = collector.finish(&WkbCodec, 10, None).unwrap();
        assert_eq!(result.total_doc_count, 1);
        assert_eq!(doc_count_of(&result, &a), Some(2));
        assert_eq!(doc_count_of(&result, &b), Some(1));
    }

    #[test]
    fn test_classifies_and_measures() {
        let square = square_wkb(0.0, 0.0, 2.0);
        let line = line_wkb(vec![(0.0, 0.0), (3.0, 4.0)]);
        let point = point_wkb(1.0, 1.0);

        let mut collector: ShapeBucketCollector = ShapeBucketCollector::new();
        collector.collect([square.as_slice()]);
        collector.collect([line.as_slice()]);
        collector.collect([point.as_slice()]);

        let result = collector.finish(&WkbCodec, 10, None).unwrap();
        let shapes: Vec<&ShapePayload> = result.buckets.iter().filter_map(|b| b.shape()).collect();

        assert_eq!(shapes.len(), 3);
        assert_eq!(shapes[0].real_type, RealType::Polygon);
        assert!((shapes[0].measure - 8.0).abs() < 1e-12);
        assert_eq!(shapes[1].real_type, RealType::LineString);
        assert!((shapes[1].measure - 5.0).abs() < 1e-12);
        assert_eq!(shapes[2].real_type, RealType::Point);
        assert_eq!(shapes[2].measure, 0.0);
    }

    #[test]
    fn test_undecodable_bucket_dropped() {
        let good = square_wkb(0.0, 0.0, 1.0);
        let bad: &[u8] = &[0x01, 0x03, 0x00, 0x00, 0x00, 0xff];

        let mut collector: ShapeBucketCollector = ShapeBucketCollector::new();
        collector.collect([good.as_slice(), bad]);

        let (result, stats) = collector.finish_with_stats(&WkbCodec, 10, None).unwrap();
        assert_eq!(result.buckets.len(), 1);
        assert_eq!(stats.observed_buckets, 2);
        assert_eq!(stats.dropped_buckets, 1);
        assert_eq!(stats.retained_buckets, 1);
    }

    #[test]
    fn test_encode_failure_fails_the_shard() {
        let line = line_wkb(vec![(0.0, 0.0), (1.0, 0.001), (2.0, 0.0)]);

        let mut collector: ShapeBucketCollector = ShapeBucketCollector::new();
        collector.collect([line.as_slice()]);

        let simplifier = Simplifier::new(0.01, SimplifyAlgorithm::DouglasPeucker);
        let err = collector
            .finish(&ReadOnlyCodec, 10, Some(&simplifier))
            .unwrap_err();
        assert!(matches!(err, AggregationError::Encode { .. }));
    }

    #[test]
    fn test_decode_failure_still_dropped_with_failing_encoder() {
        let good = square_wkb(0.0, 0.0, 1.0);
        let bad: &[u8] = &[0x01, 0x02, 0x00, 0x00, 0x00, 0x10];

        let mut collector: ShapeBucketCollector = ShapeBucketCollector::new();
        collector.collect([good.as_slice(), bad]);

        let (result, stats) = collector.finish_with_stats(&ReadOnlyCodec, 10, None).unwrap();
        assert_eq!(result.buckets.len(), 1);
        assert_eq!(stats.dropped_buckets, 1);
    }

    #[test]
    fn test_shard_size_bounds_output() {
        let mut collector: ShapeBucketCollector = ShapeBucketCollector::new();
        for i in 1..=20 {
            let bytes = square_wkb(0.0, 0.0, i as f64);
            collector.collect([bytes.as_slice()]);
        }

        let result = collector.finish(&WkbCodec, 4, None).unwrap();
        let measures: Vec<f64> = result
            .buckets
            .iter()
            .map(|b| b.shape().unwrap().measure)
            .collect();
        assert_eq!(measures, vec![80.0, 76.0, 72.0, 68.0]);
        assert_eq!(result.total_doc_count, 20);
    }

    #[test]
    fn test_simplifies_only_survivors() {
        let big = line_wkb(vec![(0.0, 0.0), (1.0, 0.001), (2.0, 0.0)]);
        let small = line_wkb(vec![(0.0, 0.0), (0.5, 0.0)]);

        let mut collector: ShapeBucketCollector = ShapeBucketCollector::new();
        collector.collect([big.as_slice()]);
        collector.collect([small.as_slice()]);

        let simplifier = Simplifier::new(0.01, SimplifyAlgorithm::DouglasPeucker);
        let result = collector.finish(&WkbCodec, 1, Some(&simplifier)).unwrap();

        assert_eq!(result.buckets.len(), 1);
        let shape = result.buckets[0].shape().unwrap();
        assert!(shape.simplified);
        // Identity stays with the collected bytes
        assert_eq!(shape.content_hash, content_hash(&big));
        assert_eq!(shape.geometry, line_wkb(vec![(0.0, 0.0), (2.0, 0.0)]));
        assert!((shape.measure - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_segments() {
        let a = square_wkb(0.0, 0.0, 1.0);
        let b = square_wkb(3.0, 3.0, 2.0);

        let mut first: ShapeBucketCollector<ValueSum> = ShapeBucketCollector::new();
        first.collect_with([a.as_slice()], |s| s.sum += 1);
        let mut second: ShapeBucketCollector<ValueSum> = ShapeBucketCollector::new();
        second.collect_with([a.as_slice(), b.as_slice()], |s| s.sum += 10);

        first.merge_from(second);
        assert_eq!(first.bucket_count(), 2);
        assert_eq!(first.total_doc_count(), 2);

        let result = first.finish(&WkbCodec, 10, None).unwrap();
        let merged = result
            .buckets
            .iter()
            .find(|bucket| bucket.shape().unwrap().content_hash == content_hash(&a))
            .unwrap();
        assert_eq!(merged.doc_count, 2);
        assert_eq!(merged.sub_aggs, ValueSum { sum: 11 });
    }
}
