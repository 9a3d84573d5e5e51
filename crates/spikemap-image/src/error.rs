//! Error types for image building

use thiserror::Error;

use crate::ids::CoreLocation;

/// Result type for image operations
pub type Result<T> = std::result::Result<T, ImageError>;

/// Errors that can occur while planning or writing a core image
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    /// Model or parameter is under- or over-specified
    #[error("Configuration error in {field}: {reason}")]
    Configuration {
        /// Offending field or region
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Value does not fit the target fixed-point or integer representation
    #[error("Value {value} is out of range for {format}")]
    Range {
        /// Value that was being encoded
        value: f64,
        /// Name of the target format
        format: String,
    },

    /// A reserved region cannot hold the data written to it
    #[error("Region {region} too small: need {needed} bytes, {available} available")]
    RegionTooSmall {
        /// Region label
        region: String,
        /// Bytes required
        needed: usize,
        /// Bytes left in the region
        available: usize,
    },

    /// Malformed image bytes
    #[error("Invalid format: {reason}")]
    InvalidFormat {
        /// Reason for invalid format
        reason: String,
    },

    /// Error raised while building the image of a specific core
    #[error("Core {core}: {source}")]
    AtCore {
        /// Core being built
        core: CoreLocation,
        /// Underlying error
        #[source]
        source: Box<ImageError>,
    },
}

impl ImageError {
    /// Create a configuration error
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a range error
    pub fn range(value: f64, format: impl Into<String>) -> Self {
        Self::Range {
            value,
            format: format.into(),
        }
    }

    /// Create a region-too-small error
    pub fn region_too_small(region: impl Into<String>, needed: usize, available: usize) -> Self {
        Self::RegionTooSmall {
            region: region.into(),
            needed,
            available,
        }
    }

    /// Create an invalid format error
    pub fn invalid_format(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }

    /// Attach the core being built. Already-attributed errors are left alone.
    pub fn at_core(self, core: CoreLocation) -> Self {
        match self {
            Self::AtCore { .. } => self,
            other => Self::AtCore {
                core,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any core attribution removed
    pub fn root(&self) -> &ImageError {
        match self {
            Self::AtCore { source, .. } => source.root(),
            other => other,
        }
    }
}
