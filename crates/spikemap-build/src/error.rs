//! Error types for the image builder

use spikemap_image::{CoreLocation, ImageError};
use thiserror::Error;

/// Result type for build operations
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that can occur while building core images
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Image layer error
    #[error("Image error: {source}")]
    Image {
        #[from]
        /// Source image error
        source: ImageError,
    },

    /// Model or parameter is under- or over-specified
    #[error("Configuration error in {field}: {reason}")]
    Configuration {
        /// Offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// A delay needs more relay stages than the delay core provides
    #[error("Projection {label} needs {stages} delay stages, at most {max_stages} supported")]
    DelayExtension {
        /// Projection label
        label: String,
        /// Stages required
        stages: u32,
        /// Stages available
        max_stages: u32,
    },

    /// Error raised while building the image of a specific core
    #[error("Core {core}: {source}")]
    AtCore {
        /// Core being built
        core: CoreLocation,
        /// Underlying error
        #[source]
        source: Box<BuildError>,
    },
}

impl BuildError {
    /// Create a configuration error
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a delay extension error
    pub fn delay_extension(label: impl Into<String>, stages: u32, max_stages: u32) -> Self {
        Self::DelayExtension {
            label: label.into(),
            stages,
            max_stages,
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

    /// Core the error was raised for, if known
    pub fn core(&self) -> Option<CoreLocation> {
        match self {
            Self::AtCore { core, .. } => Some(*core),
            _ => None,
        }
    }

    /// The innermost error, with any core attribution removed
    pub fn root(&self) -> &BuildError {
        match self {
            Self::AtCore { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for configuration errors, whether raised here or in the image layer
    pub fn is_configuration(&self) -> bool {
        match self.root() {
            Self::Configuration { .. } => true,
            Self::Image { source } => matches!(source.root(), ImageError::Configuration { .. }),
            _ => false,
        }
    }
}
