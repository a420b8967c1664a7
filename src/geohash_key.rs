//! Packed geohash cell keys.
//!
//! A cell key stores the base-32 geohash left-aligned in the upper 60 bits
//! and its precision (1..=12) in the low 4 bits, so keys are cheap to hash,
//! sort prefix-first and carry their own precision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AggregationError, Result};
use crate::geo_utils::MAX_GEOHASH_PRECISION;
use crate::GeoPoint;

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const PRECISION_BITS: u32 = 4;
const PRECISION_MASK: u64 = 0xf;

/// A geohash cell packed into a 64-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey(u64);

impl CellKey {
    /// Encode a point into the cell containing it at `precision`.
    pub fn encode(point: &GeoPoint, precision: u8) -> Result<Self> {
        check_precision(precision)?;
        let coord = geohash::Coord {
            x: point.lon,
            y: point.lat,
        };
        let hash = geohash::encode(coord, precision as usize)
            .map_err(|e| AggregationError::invalid_parameter("point", e.to_string()))?;
        Self::from_geohash(&hash)
    }

    /// Pack a base-32 geohash string.
    pub fn from_geohash(hash: &str) -> Result<Self> {
        let precision = hash.len();
        if precision == 0 || precision > MAX_GEOHASH_PRECISION as usize {
            return Err(AggregationError::invalid_parameter(
                "geohash",
                format!("'{}' must have 1 to {} characters", hash, MAX_GEOHASH_PRECISION),
            ));
        }

        let mut bits = 0u64;
        for (i, ch) in hash.bytes().enumerate() {
            let value = BASE32
                .iter()
                .position(|&c| c == ch.to_ascii_lowercase())
                .ok_or_else(|| {
                    AggregationError::invalid_parameter(
                        "geohash",
                        format!("'{}' contains invalid character '{}'", hash, ch as char),
                    )
                })? as u64;
            bits |= value << char_shift(i);
        }

        Ok(CellKey(bits | precision as u64))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn precision(self) -> u8 {
        (self.0 & PRECISION_MASK) as u8
    }

    /// The base-32 geohash string of this cell.
    pub fn to_geohash(self) -> String {
        (0..self.precision() as usize)
            .map(|i| BASE32[((self.0 >> char_shift(i)) & 0x1f) as usize] as char)
            .collect()
    }

    /// The enclosing cell one level coarser, if any.
    pub fn parent(self) -> Option<CellKey> {
        let precision = self.precision();
        if precision <= 1 {
            return None;
        }
        let last = char_shift(precision as usize - 1);
        let bits = (self.0 >> PRECISION_BITS << PRECISION_BITS) & !(0x1fu64 << last);
        Some(CellKey(bits | (precision - 1) as u64))
    }

    /// Adjacent cells at the same precision, clockwise from north.
    ///
    /// Cells touching a pole have fewer than eight neighbors.
    pub fn neighbors(self) -> Vec<CellKey> {
        let hash = self.to_geohash();
        let Ok(n) = geohash::neighbors(&hash) else {
            return Vec::new();
        };
        [n.n, n.ne, n.e, n.se, n.s, n.sw, n.w, n.nw]
            .iter()
            .filter_map(|h| CellKey::from_geohash(h).ok())
            .filter(|key| *key != self)
            .collect()
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_geohash())
    }
}

fn char_shift(index: usize) -> u32 {
    PRECISION_BITS + 5 * (MAX_GEOHASH_PRECISION as u32 - 1 - index as u32)
}

fn check_precision(precision: u8) -> Result<()> {
    if precision == 0 || precision > MAX_GEOHASH_PRECISION {
        return Err(AggregationError::invalid_parameter(
            "precision",
            format!("{} is outside 1..={}", precision, MAX_GEOHASH_PRECISION),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_unpack() {
        let key = CellKey::from_geohash("u10hb").unwrap();
        assert_eq!(key.precision(), 5);
        assert_eq!(key.to_geohash(), "u10hb");
    }

    #[test]
    fn test_encode_matches_geohash() {
        // London
        let key = CellKey::encode(&GeoPoint::new(51.5074, -0.1278), 6).unwrap();
        assert_eq!(key.to_geohash(), "gcpvj0");
    }

    #[test]
    fn test_invalid_geohash() {
        assert!(CellKey::from_geohash("").is_err());
        assert!(CellKey::from_geohash("abc").is_err()); // 'a' is not base-32
        assert!(CellKey::from_geohash("0123456789bcd").is_err());
    }

    #[test]
    fn test_parent() {
        let key = CellKey::from_geohash("gcpvj0").unwrap();
        let parent = key.parent().unwrap();
        assert_eq!(parent.to_geohash(), "gcpvj");
        assert_eq!(parent.precision(), 5);
        assert!(CellKey::from_geohash("g").unwrap().parent().is_none());
    }

    #[test]
    fn test_neighbors() {
        let key = CellKey::from_geohash("u10hb").unwrap();
        let neighbors = key.neighbors();
        assert_eq!(neighbors.len(), 8);
        assert!(neighbors.iter().all(|n| n.precision() == 5));
        assert!(!neighbors.contains(&key));
    }

    #[test]
    fn test_ordering_is_prefix_first() {
        let a = CellKey::from_geohash("u0").unwrap();
        let b = CellKey::from_geohash("u1").unwrap();
        let c = CellKey::from_geohash("v").unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}
