//! Coordinator-side reduction of shape buckets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use super::{BoundedShapeRanker, Simplifier};
use crate::bucket::{Bucket, BucketPayload, ReduceContext, Reducer, ShardResult};
use crate::codec::{GeometryCodec, WkbCodec};
use crate::config::ShapeAggregationConfig;
use crate::error::{AggregationError, Result};
use crate::sub_aggs::SubAggregations;

/// Merges shape buckets by content hash and re-ranks them.
///
/// The terminal round keeps `required_size` buckets and simplifies them;
/// intermediate rounds keep the wider `shard_size` so a bucket that only wins
/// after a sibling round's contribution is not cut early.
#[derive(Clone)]
pub struct ShapeReducer {
    required_size: usize,
    shard_size: usize,
    simplifier: Option<Simplifier>,
    codec: Arc<dyn GeometryCodec>,
}

impl std::fmt::Debug for ShapeReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeReducer")
            .field("required_size", &self.required_size)
            .field("shard_size", &self.shard_size)
            .field("simplifier", &self.simplifier)
            .finish()
    }
}

impl ShapeReducer {
    /// Reducer decoding shapes as WKB.
    pub fn new(config: &ShapeAggregationConfig) -> Self {
        Self::with_codec(config, Arc::new(WkbCodec))
    }

    /// Reducer re-encoding simplified winners with `codec`.
    pub fn with_codec(config: &ShapeAggregationConfig, codec: Arc<dyn GeometryCodec>) -> Self {
        Self {
            required_size: config.required_size as usize,
            shard_size: config.effective_shard_size(),
            simplifier: config.simplify.as_ref().map(Simplifier::from_config),
            codec,
        }
    }

    /// Bound applied by a round of the given kind.
    pub fn bound(&self, final_reduce: bool) -> usize {
        if final_reduce {
            self.required_size
        } else {
            self.shard_size
        }
    }

    pub fn reduce<S: SubAggregations>(
        &self,
        results: Vec<ShardResult<S>>,
        ctx: &ReduceContext,
    ) -> Result<ShardResult<S>> {
        let start = Instant::now();
        let mut total_doc_count = 0;
        let mut input_buckets = 0;

        // content hash -> index into `groups`, first-seen order
        let mut index: HashMap<u128, usize> = HashMap::new();
        let mut groups: Vec<(Bucket<S>, Vec<S>)> = Vec::new();

        for result in results {
            total_doc_count += result.total_doc_count;
            for mut bucket in result.buckets {
                input_buckets += 1;
                let hash = match &bucket.payload {
                    BucketPayload::Shape(shape) => shape.content_hash,
                    BucketPayload::Cluster(_) => {
                        return Err(AggregationError::MismatchedBucket { expected: "shape" })
                    }
                };
                let sub_aggs = std::mem::take(&mut bucket.sub_aggs);
                match index.get(&hash) {
                    Some(&i) => {
                        let (kept, parts) = &mut groups[i];
                        kept.doc_count += bucket.doc_count;
                        parts.push(sub_aggs);
                    }
                    None => {
                        index.insert(hash, groups.len());
                        groups.push((bucket, vec![sub_aggs]));
                    }
                }
            }
        }
        ctx.cancel.check()?;

        let merged_count = groups.len();
        let merged = groups.into_iter().map(|(mut bucket, mut parts)| {
            bucket.sub_aggs = if parts.len() == 1 {
                parts.pop().unwrap_or_default()
            } else {
                S::reduce(parts)
            };
            bucket
        });

        let bound = self.bound(ctx.final_reduce);
        let mut buckets = BoundedShapeRanker::new(bound).select(merged);
        ctx.cancel.check()?;

        if ctx.final_reduce {
            let dropped = match &self.simplifier {
                Some(simplifier) => simplifier.simplify_buckets(&mut buckets, self.codec.as_ref())?,
                None => 0,
            };
            info!(
                "[ShapeReducer] {} buckets -> {} distinct -> {} kept ({} dropped) in {}ms",
                input_buckets,
                merged_count,
                buckets.len(),
                dropped,
                start.elapsed().as_millis()
            );
        } else {
            debug!(
                "[ShapeReducer] Partial reduce: {} buckets -> {} distinct -> {} kept (bound {})",
                input_buckets,
                merged_count,
                buckets.len(),
                bound
            );
        }

        Ok(ShardResult::new(buckets, total_doc_count))
    }
}

impl<S: SubAggregations> Reducer<S> for ShapeReducer {
    fn reduce(&self, results: Vec<ShardResult<S>>, ctx: &ReduceContext) -> Result<ShardResult<S>> {
        ShapeReducer::reduce(self, results, ctx)
    }
}
