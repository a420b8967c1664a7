//! Nested sub-aggregation state carried by every bucket.
//!
//! The engine never looks inside sub-aggregations. It only creates an empty
//! state for a new bucket and asks the implementation to combine states when
//! buckets merge.

use serde::Serialize;

/// Opaque, mergeable sub-aggregation state.
///
/// `reduce` must be associative and commutative for flat and tree
/// reductions to agree.
pub trait SubAggregations: Clone + Default + Send + Serialize {
    /// Combine the states of buckets being merged into one.
    fn reduce(parts: Vec<Self>) -> Self;

    /// Whether there is anything worth rendering.
    fn is_empty(&self) -> bool {
        false
    }
}

/// No sub-aggregations.
impl SubAggregations for () {
    fn reduce(_parts: Vec<Self>) -> Self {}

    fn is_empty(&self) -> bool {
        true
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Sum-of-values sub-aggregation used across unit tests.
    #[derive(Debug, Clone, Default, PartialEq, Serialize)]
    pub struct ValueSum {
        pub sum: u64,
    }

    impl SubAggregations for ValueSum {
        fn reduce(parts: Vec<Self>) -> Self {
            ValueSum {
                sum: parts.iter().map(|p| p.sum).sum(),
            }
        }
    }
}
