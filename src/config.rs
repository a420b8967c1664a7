//! Per-request aggregation configuration.
//!
//! Every config is validated before a collector is built so that parameter
//! errors surface before any work starts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AggregationError, Result};
use crate::geo_utils::{tolerance_for_zoom, MAX_ZOOM};

/// Configuration for geohash point clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterAggregationConfig {
    /// Target map zoom level (0 = whole world in one 256px tile)
    pub zoom: u32,
    /// Clustering radius in pixels at the target zoom
    pub distance: u32,
}

impl Default for ClusterAggregationConfig {
    fn default() -> Self {
        Self {
            zoom: 1,
            distance: 50,
        }
    }
}

impl ClusterAggregationConfig {
    /// Parse from a JSON request body and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AggregationError::invalid_parameter("geo_point_clustering", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_zoom(self.zoom)
    }
}

/// Simplification algorithm for shape buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SimplifyAlgorithm {
    /// Ramer-Douglas-Peucker
    #[default]
    DouglasPeucker,
    /// Visvalingam-Whyatt, never introduces self-intersections.
    ///
    /// The distance tolerance is squared into a triangle-area threshold.
    TopologyPreserving,
}

impl SimplifyAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimplifyAlgorithm::DouglasPeucker => "DOUGLAS_PEUCKER",
            SimplifyAlgorithm::TopologyPreserving => "TOPOLOGY_PRESERVING",
        }
    }
}

impl FromStr for SimplifyAlgorithm {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DOUGLAS_PEUCKER" => Ok(SimplifyAlgorithm::DouglasPeucker),
            "TOPOLOGY_PRESERVING" => Ok(SimplifyAlgorithm::TopologyPreserving),
            _ => Err(AggregationError::invalid_parameter(
                "simplify.algorithm",
                format!("unknown algorithm '{}'", s),
            )),
        }
    }
}

impl TryFrom<String> for SimplifyAlgorithm {
    type Error = AggregationError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SimplifyAlgorithm> for String {
    fn from(value: SimplifyAlgorithm) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SimplifyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text format used to render shape bucket keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputFormat {
    #[default]
    Wkt,
    /// Hex-encoded WKB
    Wkb,
    GeoJson,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Wkt => "wkt",
            OutputFormat::Wkb => "wkb",
            OutputFormat::GeoJson => "geojson",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = AggregationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wkt" => Ok(OutputFormat::Wkt),
            "wkb" => Ok(OutputFormat::Wkb),
            "geojson" => Ok(OutputFormat::GeoJson),
            _ => Err(AggregationError::invalid_parameter(
                "output_format",
                format!("unknown format '{}'", s),
            )),
        }
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = AggregationError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<OutputFormat> for String {
    fn from(value: OutputFormat) -> Self {
        value.as_str().to_string()
    }
}

/// Zoom-aware simplification of the winning shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyConfig {
    /// Map zoom the shapes will be drawn at
    pub zoom: u32,
    pub algorithm: SimplifyAlgorithm,
    /// Tolerance in pixels at `zoom`. Default: 1.0
    pub pixel_tolerance: f64,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            zoom: 0,
            algorithm: SimplifyAlgorithm::DouglasPeucker,
            pixel_tolerance: 1.0,
        }
    }
}

impl SimplifyConfig {
    /// Tolerance in coordinate degrees.
    pub fn tolerance(&self) -> f64 {
        self.pixel_tolerance * tolerance_for_zoom(self.zoom)
    }

    pub fn validate(&self) -> Result<()> {
        check_zoom(self.zoom)?;
        if !self.pixel_tolerance.is_finite() || self.pixel_tolerance < 0.0 {
            return Err(AggregationError::invalid_parameter(
                "simplify.pixel_tolerance",
                format!("{} must be a non-negative number", self.pixel_tolerance),
            ));
        }
        Ok(())
    }
}

/// Configuration for top-ranked shape aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeAggregationConfig {
    /// Number of buckets in the final answer. Default: 10
    pub required_size: u32,
    /// Number of buckets each shard (and each intermediate reduce) keeps.
    /// Derived from `required_size` when not set.
    pub shard_size: Option<u32>,
    pub output_format: OutputFormat,
    pub simplify: Option<SimplifyConfig>,
}

impl Default for ShapeAggregationConfig {
    fn default() -> Self {
        Self {
            required_size: 10,
            shard_size: None,
            output_format: OutputFormat::Wkt,
            simplify: None,
        }
    }
}

impl ShapeAggregationConfig {
    /// Parse from a JSON request body and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AggregationError::invalid_parameter("geoshape", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.required_size == 0 {
            return Err(AggregationError::invalid_parameter(
                "required_size",
                "must be greater than 0",
            ));
        }
        if self.shard_size == Some(0) {
            return Err(AggregationError::invalid_parameter(
                "shard_size",
                "must be greater than 0",
            ));
        }
        if let Some(simplify) = &self.simplify {
            simplify.validate()?;
        }
        Ok(())
    }

    /// Bound applied by shards and intermediate reduces.
    ///
    /// Over-fetches when unset; never smaller than `required_size`.
    pub fn effective_shard_size(&self) -> usize {
        let required = self.required_size as usize;
        match self.shard_size {
            Some(size) => (size as usize).max(required),
            None => required.max(required * 3 / 2 + 10),
        }
    }
}

fn check_zoom(zoom: u32) -> Result<()> {
    if zoom > MAX_ZOOM {
        return Err(AggregationError::invalid_parameter(
            "zoom",
            format!("{} exceeds the maximum of {}", zoom, MAX_ZOOM),
        ));
    }
    Ok(())
}
