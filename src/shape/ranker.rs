//! Bounded top-K selection of shape buckets.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::bucket::{Bucket, BucketPayload};
use crate::sub_aggs::SubAggregations;

/// Keeps the best `bound` buckets.
///
/// Buckets rank by measure (descending), then doc count (descending), then
/// content hash (ascending) so the order never depends on arrival order.
///
/// The accumulator is a **min-heap** of at most `bound` entries, so memory is
/// bounded by `bound` whatever the number of candidates.
#[derive(Debug, Clone, Copy)]
pub struct BoundedShapeRanker {
    bound: usize,
}

impl BoundedShapeRanker {
    pub fn new(bound: usize) -> Self {
        Self { bound }
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Select the top buckets, best first.
    pub fn select<S, I>(&self, buckets: I) -> Vec<Bucket<S>>
    where
        S: SubAggregations,
        I: IntoIterator<Item = Bucket<S>>,
    {
        if self.bound == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<Reverse<Ranked<S>>> = BinaryHeap::new();
        for bucket in buckets {
            heap.push(Reverse(Ranked::new(bucket)));
            if heap.len() > self.bound {
                heap.pop(); // drop the weakest
            }
        }

        // into_sorted_vec is ascending in Reverse order, i.e. best first
        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse(ranked)| ranked.bucket)
            .collect()
    }
}

/// A bucket with its ranking key pulled out.
struct Ranked<S> {
    measure: f64,
    doc_count: u64,
    identity: u128,
    bucket: Bucket<S>,
}

impl<S> Ranked<S> {
    fn new(bucket: Bucket<S>) -> Self {
        let (measure, identity) = match &bucket.payload {
            BucketPayload::Shape(shape) => (shape.measure, shape.content_hash),
            BucketPayload::Cluster(cluster) => (0.0, cluster.cell.as_u64() as u128),
        };
        Self {
            measure,
            doc_count: bucket.doc_count,
            identity,
            bucket,
        }
    }
}

impl<S> Ord for Ranked<S> {
    /// Greater means ranked higher.
    fn cmp(&self, other: &Self) -> Ordering {
        self.measure
            .total_cmp(&other.measure)
            .then(self.doc_count.cmp(&other.doc_count))
            .then(other.identity.cmp(&self.identity))
    }
}

impl<S> PartialOrd for Ranked<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> PartialEq for Ranked<S> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<S> Eq for Ranked<S> {}
