//! # Geohash Point Clustering
//!
//! Groups point geometries into clusters sized for a map view.
//!
//! ## Algorithm
//! 1. Each point is bucketed into a geohash cell whose size follows the
//!    clustering radius (`distance` pixels at `zoom`) at the point's latitude
//! 2. Shards report one bucket per cell with its accumulated extent
//! 3. The coordinator merges same-cell buckets from all shards
//! 4. On the terminal reduce, adjacent cell buckets whose centroids are
//!    within `distance` pixels of each other are merged until stable
//!
//! Centroids are approximations: the midpoint of the accumulated extent for
//! cell buckets, a doc-count weighted average once neighbors merge.

mod collector;
mod reducer;

use std::collections::BTreeSet;

use crate::{CellKey, Extent, GeoPoint};

pub use collector::GeoPointClusterCollector;
pub use reducer::{ClusterReduceStats, ClusterReducer};

/// Cluster-specific part of a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPayload {
    /// Cell the cluster is keyed by
    pub cell: CellKey,
    /// Reported cluster position
    pub centroid: GeoPoint,
    /// Extent of every point that fell in the cluster's cells
    pub extent: Extent,
    /// Cells already absorbed into this cluster, including `cell`
    pub member_cells: BTreeSet<CellKey>,
}

impl ClusterPayload {
    /// Payload for a single cell whose points span `extent`.
    pub fn for_cell(cell: CellKey, extent: Extent) -> Self {
        Self {
            cell,
            centroid: extent.center(),
            extent,
            member_cells: BTreeSet::from([cell]),
        }
    }
}
