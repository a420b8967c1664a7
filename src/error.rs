//! Unified error handling for the aggregation engine.
//!
//! Decode and classification failures are recoverable: callers drop the
//! offending bucket and keep going. Parameter errors are raised before any
//! collection starts.

use thiserror::Error;

/// Unified error type for aggregation operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    /// Geometry bytes could not be decoded
    #[error("Malformed geometry: {message}")]
    Decode { message: String },
    /// Geometry could not be written back to bytes or text
    #[error("Failed to encode geometry: {message}")]
    Encode { message: String },
    /// Request parameter is out of range or unknown
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },
    /// Geometry type has no ranking classification
    #[error("Unsupported geometry type '{geometry_type}'")]
    UnsupportedGeometry { geometry_type: String },
    /// A reducer received a bucket of the other aggregation family
    #[error("Expected a {expected} bucket payload")]
    MismatchedBucket { expected: &'static str },
    /// The caller's deadline fired between documents or buckets
    #[error("Aggregation cancelled")]
    Cancelled,
}

impl AggregationError {
    pub fn invalid_parameter(name: &str, message: impl Into<String>) -> Self {
        AggregationError::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        AggregationError::Decode {
            message: message.into(),
        }
    }

    /// Whether the error only affects a single bucket or document.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AggregationError::Decode { .. } | AggregationError::UnsupportedGeometry { .. }
        )
    }
}

/// Result type alias for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Extension trait for converting Option to AggregationError.
pub trait OptionExt<T> {
    /// Convert Option to Result with a decode error.
    fn ok_or_decode(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_decode(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AggregationError::decode(message))
    }
}
