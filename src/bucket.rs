//! Bucket model shared by both aggregation families.
//!
//! A bucket is created when its key is first seen by a collector, mutated in
//! place while that collector is alive, frozen into a [`ShardResult`] at
//! finalize, and only ever replaced by new merged values during reduction.

use crate::cluster::ClusterPayload;
use crate::error::Result;
use crate::pipeline::CancelFlag;
use crate::shape::ShapePayload;
use crate::sub_aggs::SubAggregations;

/// Family-specific part of a bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketPayload {
    Cluster(ClusterPayload),
    Shape(ShapePayload),
}

/// One aggregate group of documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket<S = ()> {
    /// Number of contributions merged into this bucket
    pub doc_count: u64,
    /// Nested sub-aggregation state, merged via [`SubAggregations::reduce`]
    pub sub_aggs: S,
    pub payload: BucketPayload,
}

impl<S: SubAggregations> Bucket<S> {
    pub fn cluster(&self) -> Option<&ClusterPayload> {
        match &self.payload {
            BucketPayload::Cluster(payload) => Some(payload),
            BucketPayload::Shape(_) => None,
        }
    }

    pub fn shape(&self) -> Option<&ShapePayload> {
        match &self.payload {
            BucketPayload::Shape(payload) => Some(payload),
            BucketPayload::Cluster(_) => None,
        }
    }
}

/// Immutable snapshot produced once per shard (or per reduce round).
#[derive(Debug, Clone, PartialEq)]
pub struct ShardResult<S = ()> {
    pub buckets: Vec<Bucket<S>>,
    /// Documents seen by the producing scope, bucketed or not
    pub total_doc_count: u64,
}

impl<S> Default for ShardResult<S> {
    fn default() -> Self {
        Self {
            buckets: Vec::new(),
            total_doc_count: 0,
        }
    }
}

impl<S: SubAggregations> ShardResult<S> {
    pub fn new(buckets: Vec<Bucket<S>>, total_doc_count: u64) -> Self {
        Self {
            buckets,
            total_doc_count,
        }
    }

    /// Sum of bucket doc counts.
    pub fn bucketed_doc_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.doc_count).sum()
    }
}

/// Per-invocation reduce settings.
#[derive(Debug, Clone, Default)]
pub struct ReduceContext {
    /// No further reduction rounds follow this one
    pub final_reduce: bool,
    pub cancel: CancelFlag,
}

impl ReduceContext {
    /// The last round of a reduction.
    pub fn terminal() -> Self {
        Self {
            final_reduce: true,
            cancel: CancelFlag::default(),
        }
    }

    /// A partial round whose output will be reduced again.
    pub fn intermediate() -> Self {
        Self {
            final_reduce: false,
            cancel: CancelFlag::default(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Coordinator-side merge of shard results.
///
/// Implementations must give the same answer whether the inputs arrive in
/// one terminal call or through intermediate rounds first.
pub trait Reducer<S: SubAggregations> {
    fn reduce(&self, results: Vec<ShardResult<S>>, ctx: &ReduceContext) -> Result<ShardResult<S>>;
}
