//! Scatter-gather plumbing around the collectors and reducers.
//!
//! A shard's segments are collected independently (in parallel with the
//! `parallel` feature), each by its own collector, and folded into one
//! [`ShardResult`] single-threaded. The coordinator then reduces whatever
//! shard results arrived, either in one terminal round ([`gather`]) or as a
//! tree of intermediate rounds ([`tree_reduce`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::bucket::{ReduceContext, Reducer, ShardResult};
use crate::cluster::GeoPointClusterCollector;
use crate::codec::GeometryCodec;
use crate::config::{ClusterAggregationConfig, ShapeAggregationConfig};
use crate::error::{AggregationError, Result};
use crate::shape::{ShapeBucketCollector, Simplifier};
use crate::sub_aggs::SubAggregations;
use crate::GeoPoint;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation shared between a request and its workers.
///
/// Collectors poll it between documents and reducers between passes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) was called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AggregationError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Shard-side collection
// ============================================================================

/// Run `collect` over every segment, in parallel when enabled.
fn collect_segments<T, C, F>(segments: &[T], collect: F) -> Result<Vec<C>>
where
    T: Sync,
    C: Send,
    F: Fn(&T) -> Result<C> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        segments.par_iter().map(collect).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        segments.iter().map(collect).collect()
    }
}

/// Collect one shard of point documents.
///
/// `segments[s][d]` holds the points of document `d` in segment `s`.
/// `update` folds a document into the sub-aggregation state of each cell it
/// lands in.
pub fn collect_cluster_shard<S, F>(
    config: &ClusterAggregationConfig,
    segments: &[Vec<Vec<GeoPoint>>],
    update: F,
    cancel: &CancelFlag,
) -> Result<ShardResult<S>>
where
    S: SubAggregations,
    F: Fn(&mut S) + Sync,
{
    config.validate()?;

    let collectors = collect_segments(segments, |documents| {
        let mut collector = GeoPointClusterCollector::<S>::new(config);
        for points in documents {
            cancel.check()?;
            collector.collect_with(points, &update);
        }
        Ok(collector)
    })?;

    let mut collectors = collectors.into_iter();
    let mut shard = collectors
        .next()
        .unwrap_or_else(|| GeoPointClusterCollector::new(config));
    for collector in collectors {
        shard.merge_from(collector);
    }
    debug!(
        "[Pipeline] Collected {} cells from {} segments",
        shard.bucket_count(),
        segments.len()
    );
    Ok(shard.finish())
}

/// Collect one shard of encoded-geometry documents.
///
/// `segments[s][d]` holds the encoded values of document `d` in segment `s`,
/// in document order. `update` runs once per bucket the document counts
/// towards.
pub fn collect_shape_shard<S, F>(
    config: &ShapeAggregationConfig,
    codec: &dyn GeometryCodec,
    segments: &[Vec<Vec<Vec<u8>>>],
    update: F,
    cancel: &CancelFlag,
) -> Result<ShardResult<S>>
where
    S: SubAggregations,
    F: Fn(&mut S) + Sync,
{
    config.validate()?;

    let collectors = collect_segments(segments, |documents| {
        let mut collector = ShapeBucketCollector::<S>::new();
        for values in documents {
            cancel.check()?;
            collector.collect_with(values.iter().map(Vec::as_slice), &update);
        }
        Ok(collector)
    })?;

    let mut shard = ShapeBucketCollector::new();
    for collector in collectors {
        shard.merge_from(collector);
    }
    cancel.check()?;

    let simplifier = config.simplify.as_ref().map(Simplifier::from_config);
    let (result, stats) =
        shard.finish_with_stats(codec, config.effective_shard_size(), simplifier.as_ref())?;
    if stats.dropped_buckets > 0 {
        warn!(
            "[Pipeline] Dropped {} undecodable buckets on this shard",
            stats.dropped_buckets
        );
    }
    Ok(result)
}

// ============================================================================
// Coordinator-side gather
// ============================================================================

/// A shard that produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("shard {shard_id} failed: {reason}")]
pub struct ShardFailure {
    pub shard_id: usize,
    pub reason: String,
}

impl ShardFailure {
    pub fn new(shard_id: usize, reason: impl Into<String>) -> Self {
        Self {
            shard_id,
            reason: reason.into(),
        }
    }
}

/// Merged answer plus the shards that did not contribute to it.
#[derive(Debug, Clone)]
pub struct GatheredResult<S = ()> {
    pub result: ShardResult<S>,
    pub successful_shards: usize,
    pub failed_shards: usize,
    pub failures: Vec<ShardFailure>,
}

impl<S> GatheredResult<S> {
    pub fn total_shards(&self) -> usize {
        self.successful_shards + self.failed_shards
    }

    pub fn is_partial(&self) -> bool {
        self.failed_shards > 0
    }
}

/// Reduce the shards that answered in one terminal round and report the
/// ones that did not.
///
/// Failed shards never fail the request on their own.
pub fn gather<S, R>(
    reducer: &R,
    outcomes: Vec<std::result::Result<ShardResult<S>, ShardFailure>>,
    cancel: &CancelFlag,
) -> Result<GatheredResult<S>>
where
    S: SubAggregations,
    R: Reducer<S> + ?Sized,
{
    let mut results = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(result) => results.push(result),
            Err(failure) => {
                warn!("[Pipeline] {}", failure);
                failures.push(failure);
            }
        }
    }

    let successful_shards = results.len();
    let ctx = ReduceContext::terminal().with_cancel(cancel.clone());
    let result = reducer.reduce(results, &ctx)?;

    info!(
        "[Pipeline] Gathered {} buckets from {}/{} shards",
        result.buckets.len(),
        successful_shards,
        successful_shards + failures.len()
    );

    Ok(GatheredResult {
        result,
        successful_shards,
        failed_shards: failures.len(),
        failures,
    })
}

/// Reduce in groups of `fan_in` through intermediate rounds until one group
/// is left, then run the terminal round on it.
pub fn tree_reduce<S, R>(
    reducer: &R,
    results: Vec<ShardResult<S>>,
    fan_in: usize,
    cancel: &CancelFlag,
) -> Result<ShardResult<S>>
where
    S: SubAggregations,
    R: Reducer<S> + ?Sized,
{
    if fan_in < 2 {
        return Err(AggregationError::invalid_parameter(
            "fan_in",
            format!("must be at least 2, got {}", fan_in),
        ));
    }

    let intermediate = ReduceContext::intermediate().with_cancel(cancel.clone());
    let mut level = results;
    let mut rounds = 0;
    while level.len() > fan_in {
        cancel.check()?;
        let mut next = Vec::with_capacity((level.len() + fan_in - 1) / fan_in);
        let mut pending = level.into_iter().peekable();
        while pending.peek().is_some() {
            let group: Vec<ShardResult<S>> = pending.by_ref().take(fan_in).collect();
            next.push(reducer.reduce(group, &intermediate)?);
        }
        level = next;
        rounds += 1;
    }

    debug!("[Pipeline] Tree reduce: {} intermediate rounds", rounds);
    let terminal = ReduceContext::terminal().with_cancel(cancel.clone());
    reducer.reduce(level, &terminal)
}
