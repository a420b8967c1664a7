//! Bucket ordinal table.
//!
//! Maps opaque bucket keys to dense, zero-based ordinals so per-bucket state
//! can live in plain vectors. One table belongs to exactly one collector and
//! is dropped (or handed over by value) when that collector finishes.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

/// Dense ordinal assignment for bucket keys.
///
/// Ordinals are handed out in first-seen order and never reused within a
/// table, so two distinct keys can never share an ordinal.
///
/// # Example
/// ```
/// use geo_aggregations::ordinals::BucketOrdinalTable;
///
/// let mut table: BucketOrdinalTable<Vec<u8>> = BucketOrdinalTable::new();
/// assert_eq!(table.add_or_get(&b"a"[..]), (0, true));
/// assert_eq!(table.add_or_get(&b"b"[..]), (1, true));
/// assert_eq!(table.add_or_get(&b"a"[..]), (0, false));
/// ```
#[derive(Debug, Clone)]
pub struct BucketOrdinalTable<K: Eq + Hash + Clone> {
    ordinals: HashMap<K, usize>,
    keys: Vec<K>,
}

impl<K: Eq + Hash + Clone> Default for BucketOrdinalTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> BucketOrdinalTable<K> {
    /// Create an empty table. Storage grows with the number of distinct keys.
    pub fn new() -> Self {
        Self {
            ordinals: HashMap::new(),
            keys: Vec::new(),
        }
    }

    /// Return the ordinal for `key`, assigning the next one on first sight.
    ///
    /// The flag is `true` when the key was not in the table before.
    pub fn add_or_get<Q>(&mut self, key: &Q) -> (usize, bool)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if let Some(&ordinal) = self.ordinals.get(key) {
            return (ordinal, false);
        }

        let ordinal = self.keys.len();
        let owned = key.to_owned();
        self.keys.push(owned.clone());
        self.ordinals.insert(owned, ordinal);
        (ordinal, true)
    }

    /// Consume the table and hand over the keys in ordinal order.
    pub fn into_keys(self) -> Vec<K> {
        self.keys
    }

    /// Get the number of distinct keys in the table.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
